use rpi_hub75::color::cie1931;
use rpi_hub75::gpio::gpio_bit;
use rpi_hub75::Canvas;
use rpi_hub75::FrameCanvas;
use rpi_hub75::MatrixOptions;
use rpi_hub75::RGBMatrix;

fn offscreen(options: MatrixOptions) -> RGBMatrix {
    RGBMatrix::builder(options).build_offscreen().unwrap()
}

fn small_options() -> MatrixOptions {
    MatrixOptions {
        rows: 16,
        cols: 32,
        ..MatrixOptions::default()
    }
}

fn linear_canvas(matrix: &mut RGBMatrix, pwm_bits: u8) -> FrameCanvas {
    let mut canvas = matrix.create_frame_canvas();
    canvas.set_pwm_bits(pwm_bits).unwrap();
    canvas.set_luminance_correct(false);
    canvas
}

#[test]
fn linear_values_survive_at_eight_bits() {
    let mut matrix = offscreen(small_options());
    let mut canvas = linear_canvas(&mut matrix, 8);
    for (i, value) in [0u8, 1, 2, 127, 128, 200, 255].into_iter().enumerate() {
        canvas.set_pixel(i as i32, 3, value, 255 - value, value / 2);
        let planes = canvas.framebuffer().read_pixel_planes(i, 3).unwrap();
        let expected = [u16::from(value), u16::from(255 - value), u16::from(value / 2)];
        assert_eq!(planes.map(|p| p >> 3), expected);
    }
}

#[test]
fn luminance_correction_is_monotonic() {
    let mut matrix = offscreen(small_options());
    let canvas = matrix.create_frame_canvas();
    let mut previous = 0;
    for value in 0..=255u8 {
        canvas.framebuffer().set_pixel(5, 5, value, 0, 0);
        let red = canvas.framebuffer().read_pixel_planes(5, 5).unwrap()[0];
        assert!(red >= previous, "{value}: {red} < {previous}");
        assert_eq!(red, cie1931(value, 100));
        previous = red;
    }
    assert_eq!(previous, 2047);
}

#[test]
fn out_of_range_pixels_are_ignored() {
    let mut matrix = offscreen(small_options());
    let mut canvas = matrix.create_frame_canvas();
    let before = canvas.serialize();
    canvas.set_pixel(-1, 0, 255, 255, 255);
    canvas.set_pixel(0, -1, 255, 255, 255);
    canvas.set_pixel(32, 0, 255, 255, 255);
    canvas.set_pixel(0, 16, 255, 255, 255);
    canvas.set_pixel(i32::MAX, i32::MIN, 255, 255, 255);
    assert_eq!(canvas.serialize(), before);
}

#[test]
fn setting_a_pixel_leaves_its_neighbours_alone() {
    let mut matrix = offscreen(small_options());
    let mut canvas = linear_canvas(&mut matrix, 11);
    canvas.fill(10, 20, 30);
    canvas.set_pixel(4, 2, 255, 0, 255);
    // same gpio word, other half of the panel
    let lower = canvas.framebuffer().read_pixel_planes(4, 10).unwrap();
    assert_eq!(lower, [80, 160, 240]);
    assert_eq!(canvas.framebuffer().read_pixel_planes(4, 2).unwrap(), [2040, 0, 2040]);
    assert_eq!(canvas.framebuffer().read_pixel_planes(5, 2).unwrap(), [80, 160, 240]);
}

#[test]
fn fill_and_clear_are_idempotent() {
    let mut matrix = offscreen(small_options());
    let mut canvas = matrix.create_frame_canvas();
    canvas.fill(12, 34, 56);
    let once = canvas.serialize();
    canvas.fill(12, 34, 56);
    assert_eq!(canvas.serialize(), once);

    Canvas::clear(&mut canvas);
    let cleared = canvas.serialize();
    assert!(cleared.iter().all(|b| *b == 0));
    Canvas::clear(&mut canvas);
    assert_eq!(canvas.serialize(), cleared);
}

#[test]
fn fill_matches_per_pixel_drawing() {
    let mut matrix = offscreen(small_options());
    let mut filled = matrix.create_frame_canvas();
    let mut drawn = matrix.create_frame_canvas();
    filled.fill(1, 99, 254);
    for y in 0..16 {
        for x in 0..32 {
            drawn.set_pixel(x, y, 1, 99, 254);
        }
    }
    assert_eq!(filled.serialize(), drawn.serialize());
}

#[test]
fn brightness_is_clamped() {
    let mut matrix = offscreen(small_options());
    let mut canvas = matrix.create_frame_canvas();
    canvas.set_brightness(0);
    assert_eq!(canvas.brightness(), 1);
    canvas.set_brightness(250);
    assert_eq!(canvas.brightness(), 100);

    matrix.set_brightness(0);
    assert_eq!(matrix.brightness(), 1);
    assert_eq!(matrix.create_frame_canvas().brightness(), 1);
}

#[test]
fn brightness_scales_linear_values() {
    let mut matrix = offscreen(small_options());
    let mut canvas = linear_canvas(&mut matrix, 11);
    canvas.set_brightness(50);
    canvas.set_pixel(0, 0, 200, 0, 0);
    assert_eq!(canvas.framebuffer().read_pixel_planes(0, 0).unwrap()[0], 100 << 3);
}

#[test]
fn pwm_bits_are_validated() {
    let mut matrix = offscreen(small_options());
    let mut canvas = matrix.create_frame_canvas();
    assert!(canvas.set_pwm_bits(0).is_err());
    assert!(canvas.set_pwm_bits(12).is_err());
    canvas.set_pwm_bits(1).unwrap();
    assert_eq!(canvas.pwm_bits(), 1);
    assert!(matrix.set_pwm_bits(12).is_err());
    matrix.set_pwm_bits(7).unwrap();
    assert_eq!(matrix.create_frame_canvas().pwm_bits(), 7);
}

#[test]
fn led_sequence_swaps_wires() {
    let mut matrix = offscreen(MatrixOptions {
        led_rgb_sequence: "BGR".to_string(),
        ..small_options()
    });
    let mut canvas = linear_canvas(&mut matrix, 11);
    canvas.set_pixel(0, 0, 255, 0, 0);
    // red goes out on the wire the mapping calls blue
    for plane in 3..11 {
        assert_eq!(canvas.framebuffer().word(0, 0, plane), gpio_bit(7));
    }
    assert_eq!(canvas.framebuffer().read_pixel_planes(0, 0).unwrap(), [2040, 0, 0]);
}

#[test]
fn inverse_colors_invert_the_planes() {
    let mut matrix = offscreen(MatrixOptions {
        inverse_colors: true,
        ..small_options()
    });
    let mut canvas = linear_canvas(&mut matrix, 11);
    Canvas::clear(&mut canvas);
    assert_eq!(canvas.framebuffer().read_pixel_planes(7, 7).unwrap(), [2047; 3]);
    canvas.set_pixel(7, 7, 255, 0, 0);
    let planes = canvas.framebuffer().read_pixel_planes(7, 7).unwrap();
    assert_eq!(planes, [!2040u16 & 2047, 2047, 2047]);
}

#[test]
fn deserialize_rejects_other_geometry() {
    let mut small = offscreen(small_options());
    let mut large = offscreen(MatrixOptions::default());
    let data = small.create_frame_canvas().serialize();
    assert!(large.create_frame_canvas().deserialize(&data).is_err());
    let mut other = small.create_frame_canvas();
    other.deserialize(&data).unwrap();
}
