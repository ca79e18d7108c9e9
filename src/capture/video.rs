//! Video and camera frame sources
//!
//! Animated GIFs are decoded in-process. Every other container, device or
//! network URL goes through an `ffmpeg` child process that streams raw
//! `rgb24` frames over its stdout. A non-zero ffmpeg exit is reported as an
//! error carrying its stderr.

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, RgbImage};
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use super::frame::Frame;
use crate::error::PlateError;

/// A video input for ffmpeg or the GIF decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSource {
    /// File path, device path (`/dev/video0`) or stream URL (`rtsp://...`)
    pub location: String,
    /// Explicit ffmpeg input format, e.g. `v4l2` for a local camera
    pub input_format: Option<String>,
}

impl VideoSource {
    /// A video file on disk
    pub fn from_path(path: &Path) -> Self {
        Self {
            location: path.to_string_lossy().into_owned(),
            input_format: None,
        }
    }

    /// Whether the location should exist on the local filesystem
    fn is_local_file(&self) -> bool {
        self.input_format.is_none() && !self.location.contains("://")
    }

    fn is_gif(&self) -> bool {
        self.is_local_file()
            && Path::new(&self.location)
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("gif"))
                .unwrap_or(false)
    }
}

/// Open a video file as a lazy frame sequence
pub fn iterate_video(path: &Path) -> Result<VideoFrames, PlateError> {
    iterate_video_source(&VideoSource::from_path(path))
}

/// Open any supported video source as a lazy frame sequence
pub fn iterate_video_source(source: &VideoSource) -> Result<VideoFrames, PlateError> {
    if source.is_local_file() && !Path::new(&source.location).is_file() {
        return Err(PlateError::open(&source.location, "no such file"));
    }

    let stream = if source.is_gif() {
        open_gif(source)?
    } else {
        FrameStream::Ffmpeg(FfmpegStream::spawn(source)?)
    };

    info!("Opened video source {}", source.location);

    Ok(VideoFrames::new(stream, &source.location))
}

fn open_gif(source: &VideoSource) -> Result<FrameStream, PlateError> {
    let file = File::open(&source.location).map_err(|e| PlateError::open(&source.location, e))?;
    let decoder =
        GifDecoder::new(BufReader::new(file)).map_err(|e| PlateError::open(&source.location, e))?;
    Ok(FrameStream::Gif(decoder.into_frames()))
}

enum FrameStream {
    Gif(image::Frames<'static>),
    Ffmpeg(FfmpegStream),
}

/// Finite, non-restartable sequence of decoded frames
///
/// Frames carry their 1-based position in the stream. Dropping the sequence
/// releases the underlying decoder.
pub struct VideoFrames {
    stream: FrameStream,
    location: String,
    next_index: u64,
    finished: bool,
}

impl VideoFrames {
    fn new(stream: FrameStream, location: &str) -> Self {
        Self {
            stream,
            location: location.to_string(),
            next_index: 1,
            finished: false,
        }
    }

    fn next_image(&mut self) -> Option<Result<RgbImage, PlateError>> {
        let index = self.next_index;
        match &mut self.stream {
            FrameStream::Gif(frames) => frames.next().map(|frame| {
                frame
                    .map(|f| DynamicImage::ImageRgba8(f.into_buffer()).to_rgb8())
                    .map_err(|e| PlateError::decode(format!("GIF frame {}", index), e))
            }),
            FrameStream::Ffmpeg(ffmpeg) => ffmpeg.read_frame(index).transpose(),
        }
    }
}

impl Iterator for VideoFrames {
    type Item = Result<Frame, PlateError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_image() {
            Some(Ok(image)) => {
                let frame = Frame::with_index(image, self.next_index);
                self.next_index += 1;
                Some(Ok(frame))
            }
            Some(Err(e)) => {
                // A broken pipe cannot be resynchronised; GIF decoding can skip ahead
                if matches!(self.stream, FrameStream::Ffmpeg(_)) {
                    self.finished = true;
                }
                self.next_index += 1;
                Some(Err(e))
            }
            None => {
                debug!(
                    "End of stream for {} after {} frames",
                    self.location,
                    self.next_index - 1
                );
                self.finished = true;
                None
            }
        }
    }
}

/// Most stderr bytes kept for error messages
const STDERR_LIMIT: u64 = 16 * 1024;

/// ffmpeg child process decoding to raw RGB
struct FfmpegStream {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    location: String,
    width: u32,
    height: u32,
    buffer: Vec<u8>,
}

impl FfmpegStream {
    fn spawn(source: &VideoSource) -> Result<Self, PlateError> {
        let (width, height) = probe_dimensions(source)?;
        debug!("ffmpeg decoding {} at {}x{}", source.location, width, height);
        Self::start(ffmpeg_command(source), &source.location, width, height)
    }

    /// Run `command` as a decoder emitting `width`x`height` rgb24 frames
    fn start(mut command: Command, location: &str, width: u32, height: u32) -> Result<Self, PlateError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| PlateError::open(location, format!("cannot start ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PlateError::open(location, "ffmpeg stdout unavailable"))?;
        let stderr = child.stderr.take().map(drain_stderr);

        Ok(Self {
            child,
            stdout,
            stderr,
            location: location.to_string(),
            width,
            height,
            buffer: vec![0u8; width as usize * height as usize * 3],
        })
    }

    /// Read one frame; `Ok(None)` at a clean end of stream
    fn read_frame(&mut self, index: u64) -> Result<Option<RgbImage>, PlateError> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.stdout.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(PlateError::decode(format!("video frame {}", index), e)),
            }
        }

        if filled < self.buffer.len() {
            self.finish(index)?;
            if filled > 0 {
                warn!("Dropping truncated trailing frame {} ({} bytes)", index, filled);
            }
            return Ok(None);
        }

        RgbImage::from_raw(self.width, self.height, self.buffer.clone())
            .map(Some)
            .ok_or_else(|| PlateError::decode(format!("video frame {}", index), "short buffer"))
    }

    /// Reap ffmpeg after stdout closed and report a failed exit
    ///
    /// A failure before any frame means the source never decoded.
    fn finish(&mut self, index: u64) -> Result<(), PlateError> {
        let status = self
            .child
            .wait()
            .map_err(|e| PlateError::decode(format!("video frame {}", index), e))?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            return Ok(());
        }

        let stderr = stderr.trim();
        let reason = if stderr.is_empty() {
            format!("ffmpeg exited with {}", status)
        } else {
            format!("ffmpeg exited with {}: {}", status, stderr)
        };
        if index == 1 {
            Err(PlateError::open(&self.location, reason))
        } else {
            Err(PlateError::decode(format!("video frame {}", index), reason))
        }
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        // Kill first so a live camera is released even mid-stream
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Collect the start of ffmpeg's stderr and discard the rest
fn drain_stderr(mut stderr: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut head = Vec::new();
        let _ = (&mut stderr).take(STDERR_LIMIT).read_to_end(&mut head);
        let _ = io::copy(&mut stderr, &mut io::sink());
        String::from_utf8_lossy(&head).into_owned()
    })
}

/// ffmpeg invocation streaming rgb24 frames to stdout
///
/// Auto-rotation is disabled so frames keep the stored size ffprobe reports.
fn ffmpeg_command(source: &VideoSource) -> Command {
    let mut command = Command::new("ffmpeg");
    command.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-noautorotate"]);
    if let Some(format) = &source.input_format {
        command.args(["-f", format.as_str()]);
    }
    command
        .args(["-i", source.location.as_str()])
        .args(["-f", "rawvideo", "-pix_fmt", "rgb24", "-"]);
    command
}

/// Ask ffprobe for the first video stream's dimensions
fn probe_dimensions(source: &VideoSource) -> Result<(u32, u32), PlateError> {
    let mut command = Command::new("ffprobe");
    command.args(["-v", "error"]);
    if let Some(format) = &source.input_format {
        command.args(["-f", format.as_str()]);
    }
    let output = command
        .args([
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
            source.location.as_str(),
        ])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| PlateError::open(&source.location, format!("cannot start ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PlateError::open(&source.location, stderr.trim()));
    }

    parse_dimensions(&String::from_utf8_lossy(&output.stdout))
        .ok_or_else(|| PlateError::open(&source.location, "no video stream found"))
}

/// Parse ffprobe's `WIDTHxHEIGHT` output
fn parse_dimensions(text: &str) -> Option<(u32, u32)> {
    let line = text.lines().map(str::trim).find(|l| !l.is_empty())?;
    let (w, h) = line.split_once('x')?;
    let width: u32 = w.trim().parse().ok()?;
    // Some containers append a trailing separator
    let height: u32 = h.trim().trim_end_matches('x').parse().ok()?;
    (width > 0 && height > 0).then_some((width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Rgba, RgbaImage};

    fn write_gif(path: &Path, frames: usize) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for i in 0..frames {
            let shade = (i * 40) as u8;
            let img = RgbaImage::from_pixel(6, 4, Rgba([shade, 100, 50, 255]));
            let frame = image::Frame::from_parts(img, 0, 0, Delay::from_numer_denom_ms(40, 1));
            encoder.encode_frame(frame).unwrap();
        }
    }

    #[test]
    fn test_iterate_video_missing_file() {
        let result = iterate_video(Path::new("/nonexistent/clip.mp4"));
        assert!(matches!(result, Err(PlateError::Open { .. })));
    }

    #[test]
    fn test_iterate_video_not_a_gif() {
        let file = tempfile::Builder::new().suffix(".gif").tempfile().unwrap();
        std::fs::write(file.path(), b"GIF? no").unwrap();
        assert!(matches!(iterate_video(file.path()), Err(PlateError::Open { .. })));
    }

    #[test]
    fn test_iterate_gif_frames() {
        let file = tempfile::Builder::new().suffix(".gif").tempfile().unwrap();
        write_gif(file.path(), 3);

        let frames: Vec<Frame> = iterate_video(file.path())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].index, Some(1));
        assert_eq!(frames[2].index, Some(3));
        assert_eq!(frames[1].dimensions(), (6, 4));
    }

    #[test]
    fn test_gif_iteration_is_not_restartable() {
        let file = tempfile::Builder::new().suffix(".gif").tempfile().unwrap();
        write_gif(file.path(), 2);

        let mut frames = iterate_video(file.path()).unwrap();
        assert!(frames.next().is_some());
        assert!(frames.next().is_some());
        assert!(frames.next().is_none());
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("1920x1080\n"), Some((1920, 1080)));
        assert_eq!(parse_dimensions("\n640x480x\n"), Some((640, 480)));
        assert_eq!(parse_dimensions(""), None);
        assert_eq!(parse_dimensions("0x480"), None);
        assert_eq!(parse_dimensions("garbage"), None);
    }

    #[test]
    fn test_ffmpeg_keeps_stored_orientation() {
        let source = VideoSource::from_path(Path::new("phone.mov"));
        let args: Vec<String> = ffmpeg_command(&source)
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let no_rotate = args.iter().position(|a| a == "-noautorotate").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(no_rotate < input);
        assert_eq!(args[input + 1], "phone.mov");
    }

    /// Frame sequence over a shell script standing in for ffmpeg (4x2 frames)
    #[cfg(unix)]
    fn scripted_decoder(script: &str) -> VideoFrames {
        let mut command = Command::new("sh");
        command.args(["-c", script]);
        let stream = FfmpegStream::start(command, "clip.mp4", 4, 2).unwrap();
        VideoFrames::new(FrameStream::Ffmpeg(stream), "clip.mp4")
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_failure_before_first_frame() {
        let mut frames = scripted_decoder("echo 'Decoder h264 not found' >&2; exit 1");

        match frames.next() {
            Some(Err(PlateError::Open { reason, .. })) => {
                assert!(reason.contains("Decoder h264 not found"), "{}", reason)
            }
            other => panic!("unexpected item {:?}", other.map(|r| r.map(|f| f.index))),
        }
        assert!(frames.next().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_decoder_failure_mid_stream() {
        let mut frames = scripted_decoder("head -c 24 /dev/zero; echo 'corrupt packet' >&2; exit 3");

        let first = frames.next().unwrap().unwrap();
        assert_eq!(first.index, Some(1));
        assert_eq!(first.dimensions(), (4, 2));

        match frames.next() {
            Some(Err(PlateError::Decode { what, reason })) => {
                assert_eq!(what, "video frame 2");
                assert!(reason.contains("corrupt packet"), "{}", reason);
            }
            other => panic!("unexpected item {:?}", other.map(|r| r.map(|f| f.index))),
        }
        assert!(frames.next().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_exit_drops_truncated_frame() {
        let mut frames = scripted_decoder("head -c 30 /dev/zero");
        assert!(frames.next().unwrap().is_ok());
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_source_classification() {
        let file = VideoSource::from_path(Path::new("clips/car.GIF"));
        assert!(file.is_gif());

        let camera = VideoSource {
            location: "/dev/video0".to_string(),
            input_format: Some("v4l2".to_string()),
        };
        assert!(!camera.is_local_file());

        let rtsp = VideoSource {
            location: "rtsp://camera.local/stream".to_string(),
            input_format: None,
        };
        assert!(!rtsp.is_local_file());
    }
}
