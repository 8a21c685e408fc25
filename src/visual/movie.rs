//! Writing captured frames to image sequences, animated GIFs and video files.

use std::path::{Path, PathBuf};

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, ImageFormat, RgbaImage};

use crate::errors::{PsywinError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct MovieOptions {
    /// Encoder for video containers, `libx264` or `mpeg4`.
    pub codec: String,
    pub fps: u32,
    /// Drop the stored frames once they have been written.
    pub clear_frames: bool,
}

impl Default for MovieOptions {
    fn default() -> Self {
        Self {
            codec: "libx264".into(),
            fps: 30,
            clear_frames: true,
        }
    }
}

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "mov", "mpg", "mpeg"];

fn extension(path: &Path) -> String {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Write `frames` to `path`, choosing the format from the extension. Several frames
/// with an image extension become a numbered sequence (`frame001.png`, ...).
pub fn write_frames(frames: &[RgbaImage], path: &Path, options: &MovieOptions) -> Result<()> {
    if frames.is_empty() {
        return Ok(());
    }
    let ext = extension(path);
    if ext == "gif" {
        return write_gif(frames, path, options.fps);
    }
    if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        return write_video(frames, path, &ext, options);
    }

    let format = ImageFormat::from_path(path)
        .map_err(|_| PsywinError::UnsupportedFormatError(path.display().to_string()))?;
    if frames.len() == 1 {
        return save_image(&frames[0], path, format);
    }
    for (path, frame) in sequence_paths(path, frames.len()).iter().zip(frames) {
        save_image(frame, path, format)?;
    }
    Ok(())
}

/// File names for an image sequence, numbered from 1 and zero-padded to fit `n`.
pub fn sequence_paths(path: &Path, n: usize) -> Vec<PathBuf> {
    let width = ((n + 1) as f64).log10().ceil() as usize;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..=n)
        .map(|i| path.with_file_name(format!("{stem}{i:0width$}{ext}")))
        .collect()
}

fn save_image(frame: &RgbaImage, path: &Path, format: ImageFormat) -> Result<()> {
    match format {
        // no alpha channel in these
        ImageFormat::Jpeg | ImageFormat::Bmp | ImageFormat::Pnm => {
            DynamicImage::ImageRgba8(frame.clone())
                .to_rgb8()
                .save_with_format(path, format)?;
        }
        _ => frame.save_with_format(path, format)?,
    }
    Ok(())
}

fn write_gif(frames: &[RgbaImage], path: &Path, fps: u32) -> Result<()> {
    let file = std::io::BufWriter::new(std::fs::File::create(path)?);
    let mut encoder = GifEncoder::new(file);
    encoder.set_repeat(Repeat::Infinite)?;
    let delay = Delay::from_numer_denom_ms(1000, fps.max(1));
    encoder.encode_frames(
        frames
            .iter()
            .map(|frame| Frame::from_parts(frame.clone(), 0, 0, delay)),
    )?;
    Ok(())
}

#[cfg(not(feature = "gst"))]
fn write_video(_frames: &[RgbaImage], path: &Path, _ext: &str, _options: &MovieOptions) -> Result<()> {
    Err(PsywinError::UnsupportedFormatError(format!(
        "{} (video export needs the `gst` feature)",
        path.display()
    )))
}

#[cfg(feature = "gst")]
fn write_video(frames: &[RgbaImage], path: &Path, ext: &str, options: &MovieOptions) -> Result<()> {
    use gstreamer::prelude::*;

    fn gst_error(e: impl std::fmt::Display) -> PsywinError {
        PsywinError::CustomError(format!("GStreamer: {e}"))
    }

    let (width, height) = frames[0].dimensions();
    if frames.iter().any(|f| f.dimensions() != (width, height)) {
        return Err(PsywinError::InvalidOptionError(
            "all movie frames must have the same size".into(),
        ));
    }
    let fps = options.fps.max(1);

    gstreamer::init().map_err(gst_error)?;

    let info = gstreamer_video::VideoInfo::builder(gstreamer_video::VideoFormat::Rgba, width, height)
        .fps(gstreamer::Fraction::new(fps as i32, 1))
        .build()
        .map_err(gst_error)?;
    let appsrc = gstreamer_app::AppSrc::builder()
        .caps(&info.to_caps().map_err(gst_error)?)
        .format(gstreamer::Format::Time)
        .build();

    let encoder_name = match options.codec.as_str() {
        "libx264" | "h264" => "x264enc",
        "mpeg4" => "avenc_mpeg4",
        other => other,
    };
    let muxer_name = match ext {
        "mov" => "qtmux",
        "mpg" | "mpeg" => "mpegpsmux",
        _ => "mp4mux",
    };

    let convert = gstreamer::ElementFactory::make("videoconvert").build().map_err(gst_error)?;
    let encoder = gstreamer::ElementFactory::make(encoder_name).build().map_err(gst_error)?;
    let muxer = gstreamer::ElementFactory::make(muxer_name).build().map_err(gst_error)?;
    let sink = gstreamer::ElementFactory::make("filesink")
        .property("location", path.to_string_lossy().as_ref())
        .build()
        .map_err(gst_error)?;

    let pipeline = gstreamer::Pipeline::default();
    let elements = [appsrc.upcast_ref::<gstreamer::Element>(), &convert, &encoder, &muxer, &sink];
    pipeline.add_many(elements).map_err(gst_error)?;
    gstreamer::Element::link_many(elements).map_err(gst_error)?;
    pipeline.set_state(gstreamer::State::Playing).map_err(gst_error)?;

    let frame_ns = 1_000_000_000 / fps as u64;
    for (i, frame) in frames.iter().enumerate() {
        let mut buffer = gstreamer::Buffer::from_mut_slice(frame.as_raw().clone());
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(gstreamer::ClockTime::from_nseconds(i as u64 * frame_ns));
            buffer.set_duration(gstreamer::ClockTime::from_nseconds(frame_ns));
        }
        appsrc.push_buffer(buffer).map_err(gst_error)?;
    }
    appsrc.end_of_stream().map_err(gst_error)?;

    let bus = pipeline
        .bus()
        .ok_or_else(|| gst_error("pipeline without a bus"))?;
    let mut result = Ok(());
    for msg in bus.iter_timed(gstreamer::ClockTime::NONE) {
        match msg.view() {
            gstreamer::MessageView::Eos(..) => break,
            gstreamer::MessageView::Error(err) => {
                result = Err(gst_error(err.error()));
                break;
            }
            _ => {}
        }
    }
    pipeline.set_state(gstreamer::State::Null).map_err(gst_error)?;
    result
}
