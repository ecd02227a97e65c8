//! Color gradients with a pulsing brightness and the render rate on top.
//!
//! Run with `--sim` to drive simulated pins instead of the GPIO header.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use embedded_graphics::geometry::Point;
use embedded_graphics::mono_font::ascii::FONT_5X7;
use embedded_graphics::mono_font::MonoTextStyleBuilder;
use embedded_graphics::pixelcolor::RgbColor;
use embedded_graphics::text::Alignment;
use embedded_graphics::text::Text;
use embedded_graphics::Drawable;
use log::info;
use rpi_hub75::pulser::PinPulser;
use rpi_hub75::sim::SimulatedGpio;
use rpi_hub75::sim::SimulatedPulser;
use rpi_hub75::timing::SystemClock;
use rpi_hub75::Canvas;
use rpi_hub75::Color;
use rpi_hub75::Hub75Error;
use rpi_hub75::MatrixOptions;
use rpi_hub75::RGBMatrix;
use rpi_hub75::RuntimeOptions;

const RUN_TIME: Duration = Duration::from_secs(30);

fn main() -> Result<(), Hub75Error> {
    env_logger::init();

    let options = MatrixOptions {
        rows: 32,
        cols: 64,
        ..MatrixOptions::default()
    };
    let simulate = std::env::args().any(|arg| arg == "--sim");
    let mut matrix = if simulate {
        RGBMatrix::builder(options).build_with_hardware(
            Box::new(SimulatedGpio::new()),
            Arc::new(SystemClock::new()),
            |_, _| Ok(Box::new(SimulatedPulser::new()) as Box<dyn PinPulser>),
        )?
    } else {
        RGBMatrix::new(options, &RuntimeOptions::default())?
    };

    let fps_style = MonoTextStyleBuilder::new()
        .font(&FONT_5X7)
        .text_color(Color::YELLOW)
        .background_color(Color::BLACK)
        .build();

    let width = matrix.width();
    let height = matrix.height();
    let band = (height / 3).max(1);
    let mut canvas = matrix.create_frame_canvas();
    let mut render_rate = 0;
    let mut count = 0u32;
    let mut rate_start = Instant::now();
    let start = Instant::now();

    while start.elapsed() < RUN_TIME {
        // triangle wave between 20 and 100 percent, one period every 4 seconds
        let phase = (start.elapsed().as_millis() % 4000) as u32;
        let level = if phase < 2000 { phase } else { 4000 - phase };
        canvas.set_brightness((20 + level * 80 / 2000) as u8);

        Canvas::clear(&mut canvas);
        for x in 0..width {
            let value = (x * 255 / width.max(1)) as u8;
            for y in 0..band {
                canvas.set_pixel(x as i32, y as i32, value, 0, 0);
                canvas.set_pixel(x as i32, (y + band) as i32, 0, value, 0);
                canvas.set_pixel(x as i32, (y + 2 * band) as i32, 0, 0, value);
            }
        }
        let text = format!("Render: {render_rate:4}");
        // drawing into a frame canvas can't fail
        let _ = Text::with_alignment(
            &text,
            Point::new(0, height as i32 - 1),
            fps_style,
            Alignment::Left,
        )
        .draw(&mut canvas);

        canvas = match matrix.swap_on_vsync(Some(canvas), 1) {
            Some(previous) => previous,
            None => matrix.create_frame_canvas(),
        };

        count += 1;
        if rate_start.elapsed() >= Duration::from_secs(1) {
            render_rate = count;
            info!("render rate {count} frames/s");
            count = 0;
            rate_start = Instant::now();
        }
    }
    Ok(())
}
