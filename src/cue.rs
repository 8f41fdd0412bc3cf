use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::{CueConfig, Error};

/// A play request. The player signals on the enclosed sender exactly once
/// when playback has finished, whether it succeeded or not.
pub type PlayRequest = Sender<()>;

/// Cue plays the alarm sound through an external player, one request at a
/// time. Requests carry their own completion channel, so any number of
/// detection sessions can share the player over its lifetime.
pub struct Cue {
    play: Sender<PlayRequest>,
    shutdown: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Cue {
    pub fn start(config: &CueConfig) -> Result<Self, Error> {
        let wav = match &config.path {
            Some(path) if Path::new(path).exists() => PathBuf::from(path),
            Some(path) => {
                log::warn!("cue file {} is missing, using a generated tone", path);
                fallback_wav()?
            }
            None => fallback_wav()?,
        };

        let (play, requests) = channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let player = config.player.clone();
        let shutdown2 = shutdown.clone();
        let thread = Some(thread::spawn(move || {
            Cue::mainloop(player, wav, requests, shutdown2);
        }));

        Ok(Self {
            play,
            shutdown,
            thread,
        })
    }

    /// A sender for play requests; clone freely.
    pub fn requests(&self) -> Sender<PlayRequest> {
        self.play.clone()
    }

    fn mainloop(
        player: String,
        wav: PathBuf,
        requests: Receiver<PlayRequest>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            let reply = match requests.recv_timeout(Duration::from_millis(200)) {
                Ok(reply) => reply,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            };

            match Command::new(&player)
                .arg(&wav)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
            {
                Ok(status) if status.success() => {}
                Ok(status) => log::warn!("{} exited with {}", player, status),
                Err(e) => log::warn!("failed to run {}: {}", player, e),
            }

            // One finished event per request, played or not, so the gate
            // always re-arms.
            reply.send(()).ok();
        }
    }
}

impl Drop for Cue {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(hnd) = self.thread.take() {
            hnd.join().ok();
        }
    }
}

/// Path of the generated fallback tone, written once per machine.
fn fallback_wav() -> Result<PathBuf, Error> {
    let path = std::env::temp_dir().join("touchwatch-cue.wav");
    if path.exists() {
        return Ok(path);
    }
    write_fallback(&path)?;
    Ok(path)
}

/// Two short tones, 880Hz then 660Hz.
fn write_fallback(path: &Path) -> Result<(), Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| Error::Setup(format!("writing fallback cue: {}", e)))?;
    for freq in [880.0f32, 660.0] {
        for n in 0..(spec.sample_rate / 5) {
            let t = n as f32 / spec.sample_rate as f32;
            let v = (t * freq * 2.0 * std::f32::consts::PI).sin();
            writer
                .write_sample((v * 0.4 * i16::MAX as f32) as i16)
                .map_err(|e| Error::Setup(format!("writing fallback cue: {}", e)))?;
        }
    }
    writer
        .finalize()
        .map_err(|e| Error::Setup(format!("writing fallback cue: {}", e)))?;

    Ok(())
}
