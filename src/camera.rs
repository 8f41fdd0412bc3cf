use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::{CameraConfig, Error, Frame};

const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Hands out the newest frame. Training and detection must never work
/// through a backlog of stale frames.
pub trait FrameSource: Send + Sync {
    fn grab(&self) -> Result<Frame, Error>;
}

/// Camera reads raw RGB24 video from an ffmpeg child process and keeps only
/// the most recent frame.
pub struct Camera {
    child: Child,
    input: String,
    slot: Arc<Mutex<Option<Frame>>>,
    alive: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Camera {
    pub fn start(config: &CameraConfig) -> Result<Self, Error> {
        let mut child = Self::command(config)
            .spawn()
            .map_err(|e| Error::Setup(format!("spawning ffmpeg: {}", e)))?;

        let slot = Arc::new(Mutex::new(None));
        let alive = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));

        let frame_len = config.width * config.height * 3;
        let (width, height) = (config.width, config.height);
        let slot2 = slot.clone();
        let alive2 = alive.clone();
        let shutdown2 = shutdown.clone();
        let stdout = child.stdout.take().unwrap();
        let thread = Some(thread::spawn(move || {
            Camera::mainloop(frame_len, width, height, slot2, alive2, shutdown2, stdout);
        }));

        let out = Self {
            child,
            input: config.input.clone(),
            slot,
            alive,
            shutdown,
            thread,
        };
        out.wait_for_first_frame(FIRST_FRAME_TIMEOUT)?;

        Ok(out)
    }

    fn command(config: &CameraConfig) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg(&config.format)
            .arg("-i")
            .arg(&config.input)
            .arg("-vf")
            .arg(format!("scale={}:{}", config.width, config.height))
            .arg("-r")
            .arg(config.fps.to_string())
            .arg("-pix_fmt")
            .arg("rgb24")
            .arg("-f")
            .arg("rawvideo")
            .arg("pipe:1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        cmd
    }

    /// A dead camera must fail setup, not the first detection iteration.
    fn wait_for_first_frame(&self, timeout: Duration) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.slot.lock().unwrap().is_some() {
                return Ok(());
            }
            if !self.alive.load(Ordering::SeqCst) {
                return Err(Error::Setup(format!(
                    "video stream from {} ended before the first frame",
                    self.input
                )));
            }
            if Instant::now() >= deadline {
                return Err(Error::Setup(format!(
                    "no frame from {} within {:?}",
                    self.input, timeout
                )));
            }
            thread::sleep(Duration::from_millis(50));
        }
    }

    fn mainloop(
        frame_len: usize,
        width: usize,
        height: usize,
        slot: Arc<Mutex<Option<Frame>>>,
        alive: Arc<AtomicBool>,
        shutdown: Arc<AtomicBool>,
        mut stdout: std::process::ChildStdout,
    ) {
        let mut seq = 0;
        loop {
            if shutdown.load(Ordering::SeqCst) {
                alive.store(false, Ordering::SeqCst);
                return;
            }

            let mut pixels = vec![0u8; frame_len];
            if let Err(e) = stdout.read_exact(&mut pixels) {
                if !shutdown.load(Ordering::SeqCst) {
                    log::warn!("video stream ended: {}", e);
                }
                alive.store(false, Ordering::SeqCst);
                return;
            }

            let frame = Frame {
                seq,
                width,
                height,
                pixels,
            };
            seq += 1;

            *slot.lock().unwrap() = Some(frame);
        }
    }
}

impl FrameSource for Camera {
    fn grab(&self) -> Result<Frame, Error> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(Error::Capture("video stream has ended".into()));
        }
        self.slot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Capture("no frame captured yet".into()))
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.child.kill().ok();
        if let Some(hnd) = self.thread.take() {
            hnd.join().ok();
        }
    }
}
