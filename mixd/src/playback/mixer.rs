//! N-input summing mixer with per-input gain
//!
//! # Architecture
//!
//! Split into two halves:
//! - [`Mixer`]: owned by the graph on the ticker thread; sums inputs into one
//!   preallocated output block per tick
//! - [`MixerControl`]: cloneable control-plane handle; every change travels
//!   as a [`MixerCommand`] over one FIFO queue, applied at the start of the
//!   next mix, so changes for the same input are never reordered
//!
//! The mixer never clamps. The sink clamps when converting to device format.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// Unity gain
pub const UNITY_GAIN: f32 = 1.0;

/// Control messages for the mixer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixerCommand {
    /// Set the gain of one input
    SetGain { input: usize, gain: f32 },

    /// Start summing an input
    Connect(usize),

    /// Stop summing an input (it contributes silence)
    Disconnect(usize),
}

#[derive(Debug, Clone, Copy)]
struct MixerInput {
    gain: f32,
    connected: bool,
}

/// Real-time half of the mixer
pub struct Mixer {
    inputs: Vec<MixerInput>,
    commands: UnboundedReceiver<MixerCommand>,
    output: Vec<f32>,
    /// Inputs summed during the current tick
    active: usize,
}

/// Control-plane half of the mixer
#[derive(Clone)]
pub struct MixerControl {
    sender: UnboundedSender<MixerCommand>,
    shared: Arc<ControlMirror>,
}

/// Last requested values, readable without touching the real-time thread
struct ControlMirror {
    gains: Vec<AtomicU32>,
    connected: Vec<AtomicBool>,
}

/// Build a mixer with `inputs` inputs producing `block_samples` samples per tick.
///
/// All inputs start disconnected at unity gain.
pub fn mixer(inputs: usize, block_samples: usize) -> (Mixer, MixerControl) {
    let (sender, commands) = mpsc::unbounded_channel();
    debug!("Creating mixer: {} inputs, {} samples per block", inputs, block_samples);

    let mixer = Mixer {
        inputs: vec![
            MixerInput {
                gain: UNITY_GAIN,
                connected: false,
            };
            inputs
        ],
        commands,
        output: vec![0.0; block_samples],
        active: 0,
    };

    let control = MixerControl {
        sender,
        shared: Arc::new(ControlMirror {
            gains: (0..inputs).map(|_| AtomicU32::new(UNITY_GAIN.to_bits())).collect(),
            connected: (0..inputs).map(|_| AtomicBool::new(false)).collect(),
        }),
    };

    (mixer, control)
}

impl Mixer {
    /// Number of inputs
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Apply queued commands and clear the output block. Start of every tick.
    pub fn begin(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
        self.output.fill(0.0);
        self.active = 0;
    }

    fn apply(&mut self, command: MixerCommand) {
        match command {
            MixerCommand::SetGain { input, gain } => {
                if let Some(input) = self.inputs.get_mut(input) {
                    input.gain = gain;
                }
            }
            MixerCommand::Connect(input) => {
                if let Some(input) = self.inputs.get_mut(input) {
                    input.connected = true;
                }
            }
            MixerCommand::Disconnect(input) => {
                if let Some(input) = self.inputs.get_mut(input) {
                    input.connected = false;
                }
            }
        }
    }

    /// True if `input` is summed into the output
    pub fn is_connected(&self, input: usize) -> bool {
        self.inputs.get(input).map_or(false, |i| i.connected)
    }

    /// Current gain of `input` as seen by the real-time thread
    pub fn gain(&self, input: usize) -> Option<f32> {
        self.inputs.get(input).map(|i| i.gain)
    }

    /// Add one input block, scaled by the input's gain.
    ///
    /// Disconnected inputs and out-of-range indices contribute nothing.
    pub fn accumulate(&mut self, input: usize, samples: &[f32]) {
        let Some(state) = self.inputs.get(input).copied() else {
            return;
        };
        if !state.connected {
            return;
        }

        self.active += 1;
        if state.gain == 0.0 {
            return;
        }
        for (out, sample) in self.output.iter_mut().zip(samples) {
            *out += sample * state.gain;
        }
    }

    /// Mixed block for the current tick
    pub fn output(&self) -> &[f32] {
        &self.output
    }

    /// Inputs summed during the current tick
    pub fn active_inputs(&self) -> usize {
        self.active
    }
}

impl MixerControl {
    /// Set the gain of `input`. Takes effect at the next mix.
    pub fn set_gain(&self, input: usize, gain: f32) {
        let Some(mirror) = self.shared.gains.get(input) else {
            warn!("Gain change for unknown mixer input {}", input);
            return;
        };
        mirror.store(gain.to_bits(), Ordering::Release);
        self.send(MixerCommand::SetGain { input, gain });
    }

    /// Last requested gain of `input`
    pub fn gain(&self, input: usize) -> Option<f32> {
        self.shared
            .gains
            .get(input)
            .map(|g| f32::from_bits(g.load(Ordering::Acquire)))
    }

    /// Connect `input`
    pub fn connect(&self, input: usize) {
        if let Some(flag) = self.shared.connected.get(input) {
            flag.store(true, Ordering::Release);
            self.send(MixerCommand::Connect(input));
        }
    }

    /// Disconnect `input`
    pub fn disconnect(&self, input: usize) {
        if let Some(flag) = self.shared.connected.get(input) {
            flag.store(false, Ordering::Release);
            self.send(MixerCommand::Disconnect(input));
        }
    }

    /// Last requested connection state of `input`
    pub fn is_connected(&self, input: usize) -> bool {
        self.shared
            .connected
            .get(input)
            .map_or(false, |f| f.load(Ordering::Acquire))
    }

    /// Number of inputs
    pub fn input_count(&self) -> usize {
        self.shared.gains.len()
    }

    fn send(&self, command: MixerCommand) {
        // Only fails once the graph is gone, when nothing is left to control
        if self.sender.send(command).is_err() {
            debug!("Mixer gone, dropping {:?}", command);
        }
    }
}
