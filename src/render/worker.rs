//! Secondary-device workers.
//!
//! Every secondary device runs on its own thread as a small actor: commands
//! arrive over an mpsc channel, partial results leave through a single-slot
//! [`Mailbox`] that the driving thread drains. Publishing overwrites any
//! result the driving thread has not picked up yet.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::device::RenderDevice;
use crate::scene::SharedScene;
use crate::util::{Error, Result, Vec4};

/// Commands sent from the driving thread to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Reset the accumulation buffer before the next pass.
    Clear,
    /// Change the bounce count; implies a clear.
    SetNumBounces(u32),
    /// Terminate the worker.
    Stop,
}

/// Observable worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Clearing = 1,
    Rendering = 2,
    Publishing = 3,
    Terminated = 4,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Idle,
            1 => Self::Clearing,
            2 => Self::Rendering,
            3 => Self::Publishing,
            _ => Self::Terminated,
        }
    }
}

/// Shared cell holding a [`WorkerState`].
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    #[inline]
    pub fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::Acquire))
    }

    #[inline]
    fn set(&self, state: WorkerState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// A partial accumulation result.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub pixels: Vec<Vec4>,
    /// Passes accumulated by the publishing device since its last clear.
    pub samples: u32,
    /// Publish counter of the mailbox at the time of this publish.
    pub sequence: u64,
}

/// Single-slot, overwrite-on-publish result box.
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Mutex<Option<Published>>,
    publishes: AtomicU64,
    overwritten: AtomicU64,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a copy of `pixels`, replacing any unconsumed result.
    ///
    /// Returns true if an unconsumed result was overwritten.
    pub fn publish(&self, pixels: &[Vec4], samples: u32) -> bool {
        let sequence = self.publishes.fetch_add(1, Ordering::AcqRel) + 1;
        let mut slot = self.slot.lock();
        let overwrote = match slot.as_mut() {
            Some(p) if p.pixels.len() == pixels.len() => {
                p.pixels.copy_from_slice(pixels);
                p.samples = samples;
                p.sequence = sequence;
                true
            }
            existing => {
                let overwrote = existing.is_some();
                *slot = Some(Published {
                    pixels: pixels.to_vec(),
                    samples,
                    sequence,
                });
                overwrote
            }
        };
        if overwrote {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        overwrote
    }

    /// Take the pending result, leaving the slot empty.
    pub fn take(&self) -> Option<Published> {
        self.slot.lock().take()
    }

    /// Total publishes so far.
    pub fn publish_count(&self) -> u64 {
        self.publishes.load(Ordering::Acquire)
    }

    /// Publishes replaced before being consumed.
    pub fn overwritten_count(&self) -> u64 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

/// Driving-thread side of one secondary device.
pub struct ControlBlock {
    /// Index of the device in the configured set.
    pub index: usize,
    pub name: String,
    commands: Sender<DeviceCommand>,
    mailbox: Arc<Mailbox>,
    state: Arc<StateCell>,
    handle: Option<JoinHandle<Result<()>>>,
    stop_requested: bool,
}

impl ControlBlock {
    /// Spawn a worker thread rendering `device` against `scene`.
    pub fn spawn(
        index: usize,
        device: Box<dyn RenderDevice>,
        scene: SharedScene,
        publish_interval: Duration,
    ) -> Result<Self> {
        let (tx, rx) = channel::<DeviceCommand>();
        let mailbox = Arc::new(Mailbox::new());
        let state = Arc::new(StateCell::default());
        let name = device.info().name.clone();

        let worker = Worker {
            device,
            scene,
            commands: rx,
            mailbox: Arc::clone(&mailbox),
            state: Arc::clone(&state),
            publish_interval,
        };
        let handle = thread::Builder::new()
            .name(format!("render-{name}"))
            .spawn(move || worker.run())?;

        tracing::debug!(index, device = %name, "render worker started");
        Ok(Self {
            index,
            name,
            commands: tx,
            mailbox,
            state,
            handle: Some(handle),
            stop_requested: false,
        })
    }

    /// Queue a command. Returns false if the worker is gone.
    pub fn send(&self, command: DeviceCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the worker to stop without waiting. Stop is sent at most once;
    /// returns true for the call that sent it.
    pub fn request_stop(&mut self) -> bool {
        if self.stop_requested {
            return false;
        }
        self.stop_requested = true;
        let _ = self.commands.send(DeviceCommand::Stop);
        true
    }

    /// Request a stop if not already requested and wait for the thread.
    /// Returns the worker's error, if any.
    pub fn stop(&mut self) -> Result<()> {
        self.request_stop();
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::device(&self.name, "render worker panicked"))?,
            None => Ok(()),
        }
    }
}

impl Drop for ControlBlock {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::error!(device = %self.name, "{e}");
        }
    }
}

/// Worker-thread side: owns the device.
struct Worker {
    device: Box<dyn RenderDevice>,
    scene: SharedScene,
    commands: Receiver<DeviceCommand>,
    mailbox: Arc<Mailbox>,
    state: Arc<StateCell>,
    publish_interval: Duration,
}

/// Outcome of draining the command queue.
#[derive(Debug, Default, PartialEq, Eq)]
struct Drained {
    stop: bool,
    clear: bool,
}

impl Worker {
    fn run(mut self) -> Result<()> {
        let result = self.render_loop();
        self.state.set(WorkerState::Terminated);
        match &result {
            Ok(()) => tracing::debug!(device = %self.device.info().name, "render worker stopped"),
            Err(e) => tracing::error!(device = %self.device.info().name, "render worker failed: {e}"),
        }
        result
    }

    fn render_loop(&mut self) -> Result<()> {
        let size = self.device.output_size();
        let mut host = vec![Vec4::ZERO; size.x as usize * size.y as usize];
        let mut last_publish = Instant::now();

        loop {
            let drained = self.drain();
            if drained.stop {
                return Ok(());
            }

            if drained.clear {
                self.state.set(WorkerState::Clearing);
                self.device.clear(Vec4::ZERO)?;
            }

            self.state.set(WorkerState::Rendering);
            {
                let scene = self.scene.read();
                self.device.render(&scene)?;
            }

            if drained.clear || last_publish.elapsed() >= self.publish_interval {
                self.state.set(WorkerState::Publishing);
                self.device.read_output(&mut host)?;
                self.mailbox.publish(&host, self.device.sample_count());
                last_publish = Instant::now();
            }
        }
    }

    /// Apply all queued commands. Clears coalesce; Stop or a closed channel
    /// ends the worker.
    fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        loop {
            match self.commands.try_recv() {
                Ok(DeviceCommand::Clear) => drained.clear = true,
                Ok(DeviceCommand::SetNumBounces(n)) => {
                    self.device.set_num_bounces(n);
                    drained.clear = true;
                }
                Ok(DeviceCommand::Stop) | Err(TryRecvError::Disconnected) => {
                    drained.stop = true;
                    return drained;
                }
                Err(TryRecvError::Empty) => return drained,
            }
        }
    }
}
