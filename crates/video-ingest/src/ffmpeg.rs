//! FFmpeg-backed frame source.
//!
//! FFmpeg decodes the input (V4L device, file, RTSP or RTP/UDP feed), scales it
//! to the requested size and writes raw BGR24 frames to stdout. A reader thread
//! slices stdout into frames and hands them over a crossbeam channel, so
//! `capture` can wait on the next frame and the stop signal together. The
//! decoder process is started lazily and restarted on the next capture after a
//! failure, so a disconnected camera is retried by the producer's backoff loop.

use std::{
    fmt::Write,
    io::{self, ErrorKind, Read, Write as IoWrite},
    path::PathBuf,
    process::{Child, Command, Stdio},
    thread,
};

use anyhow::anyhow;
use chrono::Utc;
use crossbeam_channel::{Receiver, bounded, select};
use tracing::{debug, info};

use crate::{
    producer::FrameSource,
    stop::StopSignal,
    types::{CaptureError, Frame},
};

/// Decoded frames buffered between the reader thread and `capture`.
const READER_QUEUE: usize = 2;

type FrameReceiver = Receiver<Result<Frame, CaptureError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Ingress transport used to source frames.
pub enum SourceKind {
    /// Local V4L devices or pre-recorded files.
    Device,
    /// Real-time streaming protocol feeds.
    Rtsp,
    /// UDP socket carrying H.264 via RTP.
    Udp,
}

impl SourceKind {
    /// Infer the transport kind from a URI.
    pub fn from_uri(uri: &str) -> Self {
        if uri.starts_with("rtsp://") || uri.starts_with("rtsps://") {
            SourceKind::Rtsp
        } else if uri.starts_with("udp://") {
            SourceKind::Udp
        } else {
            SourceKind::Device
        }
    }
}

struct Decoder {
    child: Child,
    frames: FrameReceiver,
}

impl Decoder {
    fn shutdown(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Reads raw BGR24 frames from an FFmpeg child process.
pub struct FfmpegSource {
    uri: String,
    kind: SourceKind,
    program: PathBuf,
    target_size: (i32, i32),
    decoder: Option<Decoder>,
}

impl FfmpegSource {
    pub fn new(uri: impl Into<String>, target_size: (i32, i32)) -> Self {
        let uri = uri.into();
        Self {
            kind: SourceKind::from_uri(&uri),
            uri,
            program: PathBuf::from("ffmpeg"),
            target_size,
            decoder: None,
        }
    }

    /// Use a specific decoder binary instead of `ffmpeg` from `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    fn build_command(&self) -> Result<(Command, Option<String>), CaptureError> {
        let scale_arg = format!("scale={}:{}", self.target_size.0, self.target_size.1);
        let mut cmd = Command::new(&self.program);
        cmd.arg("-hide_banner").arg("-loglevel").arg("error");
        let mut stdin_payload = None;
        match self.kind {
            SourceKind::Device => {
                let input = match parse_device_index(&self.uri) {
                    Some(index) => {
                        cmd.arg("-f").arg("video4linux2");
                        format!("/dev/video{index}")
                    }
                    None => {
                        cmd.arg("-re");
                        self.uri.clone()
                    }
                };
                cmd.arg("-i").arg(input);
            }
            SourceKind::Rtsp => {
                cmd.arg("-rtsp_transport")
                    .arg("tcp")
                    .arg("-fflags")
                    .arg("nobuffer")
                    .arg("-flags")
                    .arg("low_delay")
                    .arg("-max_delay")
                    .arg("0")
                    .arg("-i")
                    .arg(&self.uri);
            }
            SourceKind::Udp => {
                cmd.arg("-protocol_whitelist")
                    .arg("file,udp,rtp,fd,pipe")
                    .arg("-fflags")
                    .arg("+genpts+discardcorrupt")
                    .arg("-flags")
                    .arg("low_delay")
                    .arg("-f")
                    .arg("sdp")
                    .arg("-i")
                    .arg("-");
                stdin_payload = Some(build_udp_sdp(&self.uri)?);
            }
        }

        cmd.arg("-an")
            .arg("-vf")
            .arg(&scale_arg)
            .arg("-pix_fmt")
            .arg("bgr24")
            .arg("-f")
            .arg("rawvideo")
            .arg("-");

        Ok((cmd, stdin_payload))
    }

    fn start_decoder(&mut self) -> Result<Decoder, CaptureError> {
        let (mut cmd, stdin_payload) = self.build_command()?;
        if stdin_payload.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        cmd.stdout(Stdio::piped()).stderr(Stdio::inherit());

        let mut child = cmd.spawn().map_err(|err| {
            debug!("ffmpeg spawn failed: {err}");
            CaptureError::Open {
                uri: self.uri.clone(),
            }
        })?;
        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")));
            }
        };

        if let Some(payload) = stdin_payload {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(err) = stdin.write_all(payload.as_bytes()) {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(CaptureError::Other(err.into()));
                }
            }
        }

        let frames = match spawn_frame_reader(stdout, self.uri.clone(), self.target_size) {
            Ok(frames) => frames,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CaptureError::Other(err.into()));
            }
        };

        info!(uri = %self.uri, kind = ?self.kind, "ffmpeg decoder started");
        Ok(Decoder { child, frames })
    }

    fn stop_decoder(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            decoder.shutdown();
        }
    }
}

impl FrameSource for FfmpegSource {
    fn describe(&self) -> String {
        format!(
            "ffmpeg:{} ({}x{})",
            self.uri, self.target_size.0, self.target_size.1
        )
    }

    fn capture(&mut self, stop: &StopSignal) -> Result<Frame, CaptureError> {
        if frame_bytes(self.target_size) == 0 {
            return Err(CaptureError::Other(anyhow!(
                "invalid capture size {}x{}",
                self.target_size.0,
                self.target_size.1
            )));
        }

        let decoder = match self.decoder.take() {
            Some(decoder) => decoder,
            None => self.start_decoder()?,
        };

        match next_frame(&decoder.frames, stop, &self.uri) {
            Ok(frame) => {
                self.decoder = Some(decoder);
                Ok(frame)
            }
            Err(err) => {
                decoder.shutdown();
                Err(err)
            }
        }
    }

    fn release(&mut self) {
        self.stop_decoder();
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.stop_decoder();
    }
}

fn frame_bytes(size: (i32, i32)) -> usize {
    (size.0.max(0) as usize) * (size.1.max(0) as usize) * 3
}

/// Slice `reader` into BGR24 frames on a dedicated thread. The thread ends after
/// the first read error or once the receiver is dropped.
fn spawn_frame_reader<R>(
    mut reader: R,
    uri: String,
    target_size: (i32, i32),
) -> io::Result<FrameReceiver>
where
    R: Read + Send + 'static,
{
    let bytes = frame_bytes(target_size);
    let (tx, rx) = bounded(READER_QUEUE);
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name("ffmpeg-reader".into())
        .spawn(move || {
            tracing::dispatcher::with_default(&dispatch, || {
                loop {
                    let mut buffer = vec![0u8; bytes];
                    let message = match reader.read_exact(&mut buffer) {
                        Ok(()) => Ok(Frame::new(
                            buffer,
                            target_size.0,
                            target_size.1,
                            Utc::now().timestamp_millis(),
                        )),
                        Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                            Err(CaptureError::EndOfStream { uri: uri.clone() })
                        }
                        Err(err) => Err(CaptureError::Other(err.into())),
                    };
                    let failed = message.is_err();
                    if tx.send(message).is_err() || failed {
                        debug!(uri = %uri, "ffmpeg reader exiting");
                        break;
                    }
                }
            })
        })?;
    Ok(rx)
}

/// Wait for the next decoded frame or the stop signal, whichever comes first.
fn next_frame(
    frames: &FrameReceiver,
    stop: &StopSignal,
    uri: &str,
) -> Result<Frame, CaptureError> {
    if stop.is_stopped() {
        return Err(CaptureError::Interrupted);
    }
    let stopped = stop.receiver();
    select! {
        recv(frames) -> message => message.unwrap_or_else(|_| {
            Err(CaptureError::EndOfStream { uri: uri.to_string() })
        }),
        recv(stopped) -> _ => Err(CaptureError::Interrupted),
    }
}

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            return stripped.parse::<i32>().ok();
        }
    }
    None
}

fn build_udp_sdp(uri: &str) -> Result<String, CaptureError> {
    let without_scheme = uri.strip_prefix("udp://").unwrap_or(uri);
    let mut parts = without_scheme.splitn(2, '?');
    let endpoint = parts.next().unwrap_or("");
    let query = parts.next();
    let mut host = "0.0.0.0";
    let mut port_str = endpoint;
    let mut sprop: Option<&str> = None;
    let mut payload: Option<&str> = None;

    if endpoint.is_empty() {
        return Err(CaptureError::Other(anyhow!(
            "udp source must include host:port, e.g. udp://127.0.0.1:5000"
        )));
    }

    if let Some((h, p)) = endpoint.rsplit_once(':') {
        if !h.is_empty() {
            host = h;
        }
        port_str = p;
    }

    let port: u16 = port_str
        .parse()
        .map_err(|_| CaptureError::Other(anyhow!("invalid UDP port in source URI")))?;

    for pair in query.into_iter().flat_map(|q| q.split('&')) {
        match pair.split_once('=') {
            Some(("sprop" | "sprop-parameter-sets", value)) => sprop = Some(value),
            Some(("payload" | "pt", value)) => payload = Some(value),
            _ => {}
        }
    }

    let payload = payload.unwrap_or("96");

    let mut sdp = String::new();
    writeln!(&mut sdp, "v=0").ok();
    writeln!(&mut sdp, "o=- 0 0 IN IP4 {host}").ok();
    writeln!(&mut sdp, "s=skyshield-udp").ok();
    writeln!(&mut sdp, "c=IN IP4 {host}").ok();
    writeln!(&mut sdp, "t=0 0").ok();
    writeln!(&mut sdp, "m=video {port} RTP/AVP {payload}").ok();
    writeln!(&mut sdp, "a=rtpmap:{payload} H264/90000").ok();
    match sprop {
        Some(sprop) => writeln!(
            &mut sdp,
            "a=fmtp:{payload} packetization-mode=1; sprop-parameter-sets={sprop}"
        )
        .ok(),
        None => writeln!(&mut sdp, "a=fmtp:{payload} packetization-mode=1").ok(),
    };

    Ok(sdp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_follows_uri_scheme() {
        assert_eq!(SourceKind::from_uri("rtsp://cam/stream"), SourceKind::Rtsp);
        assert_eq!(SourceKind::from_uri("udp://0.0.0.0:5000"), SourceKind::Udp);
        assert_eq!(SourceKind::from_uri("/dev/video0"), SourceKind::Device);
        assert_eq!(SourceKind::from_uri("clip.mp4"), SourceKind::Device);
    }

    #[test]
    fn device_index_accepts_numbers_and_dev_paths() {
        assert_eq!(parse_device_index("2"), Some(2));
        assert_eq!(parse_device_index("/dev/video1"), Some(1));
        assert_eq!(parse_device_index("/dev/video"), None);
        assert_eq!(parse_device_index("clip.mp4"), None);
    }

    #[test]
    fn udp_sdp_carries_port_and_payload() {
        let sdp = build_udp_sdp("udp://10.0.0.5:5600?pt=97").expect("valid uri");
        assert!(sdp.contains("c=IN IP4 10.0.0.5"));
        assert!(sdp.contains("m=video 5600 RTP/AVP 97"));
        assert!(sdp.contains("a=fmtp:97 packetization-mode=1"));
    }

    #[test]
    fn udp_sdp_rejects_bad_port() {
        assert!(build_udp_sdp("udp://host:notaport").is_err());
        assert!(build_udp_sdp("udp://").is_err());
    }

    /// Reader that blocks until its paired sender is dropped.
    struct StalledPipe(Receiver<()>);

    impl Read for StalledPipe {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn reader_slices_frames_then_reports_end_of_stream() {
        let stop = StopSignal::new();
        let bytes = vec![7u8; frame_bytes((2, 1)) * 2];
        let frames = spawn_frame_reader(io::Cursor::new(bytes), "clip.mp4".into(), (2, 1))
            .expect("spawn reader");

        for _ in 0..2 {
            let frame = next_frame(&frames, &stop, "clip.mp4").expect("frame");
            assert_eq!(frame.data, vec![7u8; 6]);
        }
        assert!(matches!(
            next_frame(&frames, &stop, "clip.mp4"),
            Err(CaptureError::EndOfStream { .. })
        ));
    }

    #[test]
    fn silent_decoder_wait_ends_on_stop() {
        let (hold, wait) = bounded::<()>(0);
        let frames = spawn_frame_reader(StalledPipe(wait), "rtsp://cam".into(), (2, 2))
            .expect("spawn reader");
        let stop = std::sync::Arc::new(StopSignal::new());

        let trigger = stop.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(50));
            trigger.stop();
        });

        assert!(matches!(
            next_frame(&frames, &stop, "rtsp://cam"),
            Err(CaptureError::Interrupted)
        ));
        stopper.join().expect("stopper thread");
        drop(hold);
    }

    #[cfg(unix)]
    #[test]
    fn producer_over_silent_decoder_stops_promptly() {
        use std::{
            os::unix::fs::PermissionsExt,
            sync::Arc,
            time::{Duration, Instant},
        };

        use crate::{channel::FrameChannel, producer::spawn_producer};

        let script = std::env::temp_dir().join(format!(
            "skyshield-silent-decoder-{}.sh",
            std::process::id()
        ));
        std::fs::write(&script, "#!/bin/sh\nexec sleep 1000\n").expect("write script");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("chmod script");

        let stop = Arc::new(StopSignal::new());
        let channel = Arc::new(FrameChannel::new(2));
        let source = FfmpegSource::new("rtsp://127.0.0.1/stream", (4, 2)).with_program(&script);
        let handle = spawn_producer(source, channel.clone(), stop.clone(), Duration::from_secs(60))
            .expect("spawn producer");

        thread::sleep(Duration::from_millis(200));
        stop.stop();
        channel.close();

        let deadline = Instant::now() + Duration::from_secs(3);
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        let finished = handle.is_finished();
        let _ = std::fs::remove_file(&script);
        assert!(finished, "producer still blocked after stop");
        let stats = handle.join().expect("producer thread");
        assert_eq!(stats.captured, 0);
    }
}
