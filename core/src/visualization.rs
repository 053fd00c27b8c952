use std::{
    env,
    ffi::OsString,
    io::{BufWriter, ErrorKind, Read, Write},
    path::Path,
    process::{Command, Stdio},
    thread,
};

use image::{
    codecs::gif::{GifEncoder, Repeat},
    Delay, Frame, RgbaImage,
};
use tempfile::NamedTempFile;
use tracing::info;

use crate::{Error, Result};

pub const FFMPEG_ENV: &str = "FFMPEG_BINARY";
pub const FFPROBE_ENV: &str = "FFPROBE_BINARY";

/// Frame rate and quantizer settings for animated GIF output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GifOptions {
    pub fps: u32,
    /// Quantizer speed, 1 (best palette) to 30 (fastest).
    pub speed: i32,
    pub looping: bool,
}

impl Default for GifOptions {
    fn default() -> Self {
        Self {
            fps: 60,
            speed: 10,
            looping: true,
        }
    }
}

/// Encode RGBA frames (`width * height * 4` bytes each) as an animated GIF.
///
/// Returns the number of frames written.
pub fn encode_gif<W, I>(
    writer: W,
    width: u32,
    height: u32,
    frames: I,
    options: &GifOptions,
) -> Result<usize>
where
    W: Write,
    I: IntoIterator<Item = Result<Vec<u8>>>,
{
    if options.fps == 0 {
        return Err(Error::Media("frame rate must be positive".to_string()));
    }

    let mut encoder = GifEncoder::new_with_speed(writer, options.speed.clamp(1, 30));
    if options.looping {
        encoder.set_repeat(Repeat::Infinite)?;
    }
    let delay = Delay::from_numer_denom_ms(1000, options.fps);

    let mut written = 0;
    for pixels in frames {
        let pixels = pixels?;
        let len = pixels.len();
        let buffer = RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
            Error::Media(format!(
                "frame {written} has {len} bytes, expected {} for {width}x{height} RGBA",
                width as usize * height as usize * 4
            ))
        })?;
        encoder.encode_frame(Frame::from_parts(buffer, 0, 0, delay))?;
        written += 1;
    }

    Ok(written)
}

fn tool(env_key: &str, default: &str) -> OsString {
    env::var_os(env_key).unwrap_or_else(|| OsString::from(default))
}

fn probe_dimensions(mp4_path: &Path) -> Result<(u32, u32)> {
    let output = Command::new(tool(FFPROBE_ENV, "ffprobe"))
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=p=0:s=x",
        ])
        .arg(mp4_path)
        .output()
        .map_err(|e| Error::Media(format!("failed to run ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(Error::Media(format!(
            "ffprobe failed on {}: {}",
            mp4_path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    parse_dimensions(&String::from_utf8_lossy(&output.stdout))
}

fn parse_dimensions(text: &str) -> Result<(u32, u32)> {
    let line = text.lines().next().unwrap_or("").trim();
    let parsed = line
        .split_once('x')
        .and_then(|(w, h)| Some((w.trim().parse().ok()?, h.trim().parse().ok()?)));
    match parsed {
        Some((w, h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(Error::Media(format!("unexpected video dimensions {line:?}"))),
    }
}

/// Fixed-size frames read from a raw video stream until it ends.
struct RawFrames<R> {
    reader: R,
    frame_len: usize,
    done: bool,
}

impl<R: Read> Iterator for RawFrames<R> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut frame = vec![0u8; self.frame_len];
        let mut filled = 0;
        while filled < self.frame_len {
            match self.reader.read(&mut frame[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
            }
        }
        if filled < self.frame_len {
            // a trailing partial frame is dropped
            self.done = true;
            return None;
        }
        Some(Ok(frame))
    }
}

/// Convert a video clip to an animated GIF at 60 fps.
pub fn mp4_to_gif(mp4_path: &Path, gif_path: &Path) -> Result<()> {
    mp4_to_gif_with(mp4_path, gif_path, &GifOptions::default())
}

/// Writes through a temporary file next to `gif_path`, so a failed conversion
/// leaves nothing behind.
pub fn mp4_to_gif_with(mp4_path: &Path, gif_path: &Path, options: &GifOptions) -> Result<()> {
    if !mp4_path.exists() {
        return Err(Error::MissingPath(mp4_path.to_path_buf()));
    }
    let (width, height) = probe_dimensions(mp4_path)?;

    let out_dir = match gif_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let staging = NamedTempFile::new_in(out_dir)
        .map_err(|e| Error::file("create temporary file in", out_dir, e))?;

    let mut child = Command::new(tool(FFMPEG_ENV, "ffmpeg"))
        .args(["-v", "error", "-i"])
        .arg(mp4_path)
        .arg("-vf")
        .arg(format!("fps={}", options.fps))
        .args(["-f", "rawvideo", "-pix_fmt", "rgba", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Media(format!("failed to run ffmpeg: {e}")))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::Media("ffmpeg stdout was not captured".to_string()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Media("ffmpeg stderr was not captured".to_string()))?;
    // drained alongside the frames; a full stderr pipe would stall ffmpeg
    let stderr_drain = thread::spawn(move || {
        let mut text = Vec::new();
        let _ = stderr.read_to_end(&mut text);
        text
    });

    let frames = RawFrames {
        reader: stdout,
        frame_len: width as usize * height as usize * 4,
        done: false,
    };
    let encoded = encode_gif(BufWriter::new(staging.as_file()), width, height, frames, options);

    let status = child.wait()?;
    let stderr = stderr_drain.join().unwrap_or_default();
    let count = encoded?;
    if !status.success() {
        return Err(Error::Media(format!(
            "ffmpeg failed on {} ({status}): {}",
            mp4_path.display(),
            String::from_utf8_lossy(&stderr).trim()
        )));
    }

    staging
        .persist(gif_path)
        .map_err(|e| Error::file("write", gif_path, e.error))?;
    info!(
        "wrote {count} frames from {} to {}",
        mp4_path.display(),
        gif_path.display()
    );
    Ok(())
}
