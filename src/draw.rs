//! Overlay drawing for annotated batch output.
//!
//! Batch mode burns the tracked skeleton and the running count into every output frame. Drawing
//! goes through [`embedded-graphics`], with the frame buffer acting as its draw target.
//!
//! [`embedded-graphics`]: https://crates.io/crates/embedded-graphics

use std::convert::Infallible;

use embedded_graphics::{
    draw_target::DrawTarget,
    mono_font::{iso_8859_1::FONT_10X20, MonoTextStyle},
    pixelcolor::{Rgb888, RgbColor},
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
    text::Text,
};
use image::Rgb;

use crate::frame::Frame;
use crate::protocol::LandmarkSet;

const SKELETON: Rgb888 = Rgb888::new(255, 255, 0);
const JOINT: Rgb888 = Rgb888::new(128, 0, 250);
const COUNT: Rgb888 = Rgb888::new(255, 40, 40);

struct Target<'a>(&'a mut Frame);

impl OriginDimensions for Target<'_> {
    fn size(&self) -> Size {
        Size::new(self.0.width(), self.0.height())
    }
}

impl DrawTarget for Target<'_> {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        let (width, height) = (self.0.width() as i32, self.0.height() as i32);
        for Pixel(point, color) in pixels {
            if (0..width).contains(&point.x) && (0..height).contains(&point.y) {
                self.0.buf_mut().put_pixel(
                    point.x as u32,
                    point.y as u32,
                    Rgb([color.r(), color.g(), color.b()]),
                );
            }
        }
        Ok(())
    }
}

fn to_point(pos: [f32; 2]) -> Point {
    Point::new(pos[0].round() as i32, pos[1].round() as i32)
}

/// Draws both tracked arms: the shoulder–elbow and elbow–wrist segments, joint markers, and the
/// measured angle next to each elbow.
pub fn skeleton(frame: &mut Frame, landmarks: &LandmarkSet) {
    let mut target = Target(frame);
    let arms = [
        (
            landmarks.right_shoulder,
            landmarks.right_elbow,
            landmarks.right_wrist,
            landmarks.angle_r,
        ),
        (
            landmarks.left_shoulder,
            landmarks.left_elbow,
            landmarks.left_wrist,
            landmarks.angle_l,
        ),
    ];

    for (shoulder, elbow, wrist, angle) in arms {
        let (shoulder, elbow, wrist) = (to_point(shoulder), to_point(elbow), to_point(wrist));
        let stroke = PrimitiveStyle::with_stroke(SKELETON, 3);
        let _ = Line::new(shoulder, elbow).into_styled(stroke).draw(&mut target);
        let _ = Line::new(elbow, wrist).into_styled(stroke).draw(&mut target);

        for joint in [shoulder, elbow, wrist] {
            marker(&mut target, joint);
        }

        let label = format!("{}°", angle.round() as i32);
        let _ = Text::new(
            &label,
            elbow + Point::new(20, -20),
            MonoTextStyle::new(&FONT_10X20, Rgb888::WHITE),
        )
        .draw(&mut target);
    }
}

/// Draws the count/state banner into the top-left corner.
pub fn banner(frame: &mut Frame, count: u32, state: &str) {
    let mut target = Target(frame);
    let _ = Rectangle::new(Point::zero(), Size::new(230, 40))
        .into_styled(PrimitiveStyle::with_fill(Rgb888::BLACK))
        .draw(&mut target);

    let count = count.to_string();
    let _ = Text::new(
        &count,
        Point::new(8, 28),
        MonoTextStyle::new(&FONT_10X20, COUNT),
    )
    .draw(&mut target);
    let _ = Text::new(
        state,
        Point::new(60, 28),
        MonoTextStyle::new(&FONT_10X20, Rgb888::WHITE),
    )
    .draw(&mut target);
}

fn marker(target: &mut Target<'_>, at: Point) {
    // A small X, cheaper to rasterize than the circles the original drew.
    const SIZE: i32 = 3;
    let pixels = (-SIZE..=SIZE)
        .map(|off| Pixel(at + Point::new(off, off), JOINT))
        .chain((-SIZE..=SIZE).map(|off| Pixel(at + Point::new(off, -off), JOINT)));
    match target.draw_iter(pixels) {
        Ok(()) => {}
        Err(infallible) => match infallible {},
    }
}

#[cfg(test)]
mod tests {
    use image::RgbImage;

    use super::*;

    fn landmark_set() -> LandmarkSet {
        LandmarkSet {
            right_shoulder: [20.0, 10.0],
            right_elbow: [20.0, 30.0],
            right_wrist: [20.0, 50.0],
            left_shoulder: [60.0, 10.0],
            left_elbow: [60.0, 30.0],
            left_wrist: [60.0, 50.0],
            angle_r: 175.0,
            angle_l: 172.0,
        }
    }

    #[test]
    fn skeleton_touches_joint_pixels() {
        let mut frame = Frame::new(RgbImage::new(100, 80));
        skeleton(&mut frame, &landmark_set());

        // The shoulder-elbow segment of the right arm runs straight down x=20.
        assert_ne!(*frame.buf().get_pixel(20, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn drawing_clips_at_frame_edges() {
        let mut frame = Frame::new(RgbImage::new(16, 16));
        let mut set = landmark_set();
        set.right_wrist = [300.0, -40.0];
        // Must not panic on out-of-bounds geometry.
        skeleton(&mut frame, &set);
        banner(&mut frame, 3, "Sube");
    }
}
