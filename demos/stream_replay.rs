//! Pre-render an animation into a stream file, then play it back with the
//! recorded frame timing.
//!
//! `stream_replay [--sim] <file>`. An existing file is played as is, it has
//! to match the panel geometry below.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use log::warn;
use rpi_hub75::pulser::PinPulser;
use rpi_hub75::sim::SimulatedGpio;
use rpi_hub75::sim::SimulatedPulser;
use rpi_hub75::timing::SystemClock;
use rpi_hub75::Canvas;
use rpi_hub75::Hub75Error;
use rpi_hub75::MatrixOptions;
use rpi_hub75::RGBMatrix;
use rpi_hub75::RuntimeOptions;
use rpi_hub75::StreamReader;
use rpi_hub75::StreamWriter;

const FRAMES: usize = 120;
const HOLD_TIME_US: u32 = 16_000;
const LOOPS: usize = 3;

fn record(matrix: &mut RGBMatrix, path: &Path) -> Result<(), Hub75Error> {
    let mut writer = StreamWriter::new(BufWriter::new(File::create(path)?));
    let mut canvas = matrix.create_frame_canvas();
    let (width, height) = (canvas.width(), canvas.height());
    for frame in 0..FRAMES {
        Canvas::clear(&mut canvas);
        // a diagonal bar sweeping across
        for y in 0..height {
            for x in 0..width {
                if (x + y + frame) % 16 < 4 {
                    let hue = ((x + frame) * 255 / (width + FRAMES)) as u8;
                    canvas.set_pixel(x as i32, y as i32, hue, 255 - hue, 128);
                }
            }
        }
        writer.stream(&canvas, HOLD_TIME_US)?;
    }
    writer.flush()?;
    info!("recorded {FRAMES} frames to {}", path.display());
    Ok(())
}

fn main() -> Result<(), Hub75Error> {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let simulate = args.iter().any(|arg| arg == "--sim");
    args.retain(|arg| arg != "--sim");
    let path = args
        .first()
        .cloned()
        .unwrap_or_else(|| "animation.stream".to_string());
    let path = Path::new(&path);

    let options = MatrixOptions {
        rows: 32,
        cols: 64,
        ..MatrixOptions::default()
    };
    let mut matrix = if simulate {
        RGBMatrix::builder(options).build_with_hardware(
            Box::new(SimulatedGpio::new()),
            Arc::new(SystemClock::new()),
            |_, _| Ok(Box::new(SimulatedPulser::new()) as Box<dyn PinPulser>),
        )?
    } else {
        RGBMatrix::new(options, &RuntimeOptions::default())?
    };

    if !path.exists() {
        record(&mut matrix, path)?;
    }

    let mut reader = StreamReader::new(File::open(path)?)?;
    let mut canvas = matrix.create_frame_canvas();
    for _ in 0..LOOPS {
        let mut shown = 0;
        while let Some(hold_time_us) = reader.next_frame(&mut canvas)? {
            canvas = match matrix.swap_on_vsync(Some(canvas), 1) {
                Some(previous) => previous,
                None => {
                    warn!("no canvas handed back, allocating a new one");
                    matrix.create_frame_canvas()
                }
            };
            std::thread::sleep(Duration::from_micros(u64::from(hold_time_us)));
            shown += 1;
        }
        info!("played {shown} frames");
        reader.rewind()?;
    }
    Ok(())
}
