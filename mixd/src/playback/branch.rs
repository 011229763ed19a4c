//! Playback branches
//!
//! A branch is one independently controllable chain
//! `source → rate converter → channel adapter` feeding a fixed mixer input.
//!
//! State is split across threads:
//! - [`BranchStatus`]: shared atomic word holding the session generation and
//!   the control-plane [`BranchState`]
//! - [`Branch`]: real-time half owned by the graph, driven by
//!   [`BranchCommand`]s from its own FIFO queue
//!
//! Chains are built entirely on the control thread and shipped whole, so the
//! real-time thread never allocates or decodes.

use crate::audio::channel_adapter::ChannelAdapter;
use crate::audio::resampler::RateConverter;
use crate::audio::source::{SourceRead, SourceStage};
use crate::audio::types::AudioFormat;
use crate::error::Result;
use crate::playback::events::{BranchEvent, Outbox};
use mixd_common::BranchId;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::UnboundedReceiver;

/// Control-plane state of a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum BranchState {
    /// No source loaded
    Closed = 0,
    /// Source loaded, not yet started
    Open = 1,
    /// Being pulled every tick
    Playing = 2,
    /// Source loaded, not pulled
    Paused = 3,
}

impl BranchState {
    fn from_bits(bits: u8) -> Self {
        match bits {
            1 => BranchState::Open,
            2 => BranchState::Playing,
            3 => BranchState::Paused,
            _ => BranchState::Closed,
        }
    }
}

impl fmt::Display for BranchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BranchState::Closed => "closed",
            BranchState::Open => "open",
            BranchState::Playing => "playing",
            BranchState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Session generation and state packed into one atomic word
///
/// Layout: `generation << 8 | state`. The real-time thread only ever performs
/// the `Playing → Closed` transition for the generation it is pulling, so an
/// end-of-stream from an older session can never close a newer one.
#[derive(Debug, Default)]
pub struct BranchStatus {
    word: AtomicU64,
}

fn pack(generation: u32, state: BranchState) -> u64 {
    (u64::from(generation) << 8) | state as u64
}

fn unpack(word: u64) -> (u32, BranchState) {
    ((word >> 8) as u32, BranchState::from_bits((word & 0xff) as u8))
}

impl BranchStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub fn state(&self) -> BranchState {
        self.load().1
    }

    /// Current session generation
    pub fn generation(&self) -> u32 {
        self.load().0
    }

    /// Generation and state
    pub fn load(&self) -> (u32, BranchState) {
        unpack(self.word.load(Ordering::Acquire))
    }

    /// Start a new session in `Open`. Returns the new generation.
    pub fn begin_session(&self) -> u32 {
        let previous = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (generation, _) = unpack(word);
                Some(pack(generation.wrapping_add(1), BranchState::Open))
            })
            .unwrap_or_else(|word| word);
        unpack(previous).0.wrapping_add(1)
    }

    /// Move to `to` if the current state is one of `from`. Returns the state seen.
    pub fn transition(&self, from: &[BranchState], to: BranchState) -> std::result::Result<BranchState, BranchState> {
        self.word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                let (generation, state) = unpack(word);
                from.contains(&state).then(|| pack(generation, to))
            })
            .map(|word| unpack(word).1)
            .map_err(|word| unpack(word).1)
    }

    /// Force `Closed`, keeping the generation. Returns the previous state.
    pub fn close(&self) -> BranchState {
        let previous = self
            .word
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |word| {
                Some(pack(unpack(word).0, BranchState::Closed))
            })
            .unwrap_or_else(|word| word);
        unpack(previous).1
    }

    /// Real-time end-of-stream: `generation|Playing → generation|Closed`.
    ///
    /// Fails when the control plane has paused, closed or reopened the branch
    /// in the meantime.
    pub fn finish(&self, generation: u32) -> bool {
        self.word
            .compare_exchange(
                pack(generation, BranchState::Playing),
                pack(generation, BranchState::Closed),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Stage chain of one playback session
pub struct Chain {
    source: Box<dyn SourceStage>,
    rate: RateConverter,
    adapter: ChannelAdapter,
    /// Rate converter output, in source channels
    scratch: Vec<f32>,
    generation: u32,
    restarts: u32,
}

impl Chain {
    /// Build a chain converting `source` to `output`.
    ///
    /// # Errors
    /// Rate converter construction failed
    pub fn new(
        source: Box<dyn SourceStage>,
        output: AudioFormat,
        frames_per_tick: usize,
        generation: u32,
    ) -> Result<Self> {
        let input = source.format();
        let rate = RateConverter::new(input.sample_rate, output.sample_rate, input.channels, frames_per_tick)?;
        let adapter = ChannelAdapter::new(input.channels, output.channels);

        Ok(Self {
            source,
            rate,
            adapter,
            scratch: vec![0.0; input.samples_for(frames_per_tick)],
            generation,
            restarts: 0,
        })
    }

    /// Session generation stamped at open
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Pull one tick into `out` (output format). Frame count refers to `out`.
    pub fn pull(&mut self, out: &mut [f32]) -> SourceRead {
        let read = self.rate.pull(self.source.as_mut(), &mut self.scratch);
        let in_samples = read.frames * self.adapter.input_channels() as usize;
        let frames = self.adapter.process(&self.scratch[..in_samples], out);
        SourceRead { frames, ..read }
    }

    fn set_loop(&mut self, enabled: bool) {
        self.source.set_loop(enabled);
    }
}

/// Commands for the real-time half of a branch
pub enum BranchCommand {
    /// Replace the chain (the old one is retired)
    Load(Box<Chain>),
    /// Start or resume pulling
    Play,
    /// Stop pulling, keep the chain
    Pause,
    /// Retire the chain
    Close,
    /// Restart on exhaustion
    SetLoop(bool),
}

impl fmt::Debug for BranchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchCommand::Load(chain) => write!(f, "Load(gen {})", chain.generation),
            BranchCommand::Play => f.write_str("Play"),
            BranchCommand::Pause => f.write_str("Pause"),
            BranchCommand::Close => f.write_str("Close"),
            BranchCommand::SetLoop(enabled) => write!(f, "SetLoop({})", enabled),
        }
    }
}

/// Real-time half of a branch
pub struct Branch {
    id: BranchId,
    status: std::sync::Arc<BranchStatus>,
    commands: UnboundedReceiver<BranchCommand>,
    chain: Option<Box<Chain>>,
    playing: bool,
    looping: bool,
    output: Vec<f32>,
}

impl Branch {
    /// Create an empty branch producing `block_samples` samples per tick
    pub fn new(
        id: BranchId,
        status: std::sync::Arc<BranchStatus>,
        commands: UnboundedReceiver<BranchCommand>,
        block_samples: usize,
    ) -> Self {
        Self {
            id,
            status,
            commands,
            chain: None,
            playing: false,
            looping: false,
            output: vec![0.0; block_samples],
        }
    }

    pub fn id(&self) -> BranchId {
        self.id
    }

    /// True while a chain is loaded and being pulled
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Drain queued commands
    pub fn apply_commands(&mut self, outbox: &mut Outbox) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                BranchCommand::Load(mut chain) => {
                    chain.set_loop(self.looping);
                    if let Some(old) = self.chain.replace(chain) {
                        outbox.retire(old);
                    }
                    self.playing = false;
                }
                BranchCommand::Play => self.playing = self.chain.is_some(),
                BranchCommand::Pause => self.playing = false,
                BranchCommand::Close => {
                    if let Some(old) = self.chain.take() {
                        outbox.retire(old);
                    }
                    self.playing = false;
                }
                BranchCommand::SetLoop(enabled) => {
                    self.looping = enabled;
                    if let Some(chain) = self.chain.as_mut() {
                        chain.set_loop(enabled);
                    }
                }
            }
        }
    }

    /// Pull one tick. Returns None when the branch produced nothing.
    pub fn pull(&mut self, outbox: &mut Outbox) -> Option<&[f32]> {
        if !self.playing {
            return None;
        }
        let chain = self.chain.as_mut()?;

        let read = chain.pull(&mut self.output);
        let channels = chain.adapter.output_channels() as usize;
        self.output[read.frames * channels..].fill(0.0);

        if read.restarts > 0 {
            chain.restarts = chain.restarts.saturating_add(read.restarts);
            outbox.notify(BranchEvent::Restarted {
                branch: self.id,
                restarts: chain.restarts,
            });
        }

        if read.exhausted {
            self.playing = false;
            let generation = chain.generation;
            if self.status.finish(generation) {
                outbox.notify(BranchEvent::Ended {
                    branch: self.id,
                    generation,
                });
                if let Some(done) = self.chain.take() {
                    outbox.retire(done);
                }
            }
        }

        if read.frames == 0 {
            return None;
        }
        Some(self.output.as_slice())
    }

    /// Take the loaded chain, for teardown off the real-time thread
    pub fn take_chain(&mut self) -> Option<Box<Chain>> {
        self.playing = false;
        self.chain.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::source::PcmFileSource;
    use crate::audio::types::PcmBuffer;
    use crate::playback::events::outbox;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn file_chain(frames: usize, value: f32, generation: u32) -> Box<Chain> {
        let buffer = PcmBuffer::new(vec![value; frames], AudioFormat::new(8000, 1));
        let source = Box::new(PcmFileSource::new(buffer));
        Box::new(Chain::new(source, AudioFormat::new(8000, 2), 4, generation).unwrap())
    }

    #[test]
    fn test_status_packs_generation_and_state() {
        let status = BranchStatus::new();
        assert_eq!(status.load(), (0, BranchState::Closed));

        let generation = status.begin_session();
        assert_eq!(generation, 1);
        assert_eq!(status.load(), (1, BranchState::Open));

        assert_eq!(
            status.transition(&[BranchState::Open, BranchState::Paused], BranchState::Playing),
            Ok(BranchState::Open)
        );
        assert_eq!(status.state(), BranchState::Playing);
        assert_eq!(
            status.transition(&[BranchState::Open], BranchState::Paused),
            Err(BranchState::Playing)
        );
    }

    #[test]
    fn test_stale_finish_is_ignored() {
        let status = BranchStatus::new();
        let old = status.begin_session();
        status.transition(&[BranchState::Open], BranchState::Playing).unwrap();

        let new = status.begin_session();
        status.transition(&[BranchState::Open], BranchState::Playing).unwrap();

        assert!(!status.finish(old));
        assert_eq!(status.state(), BranchState::Playing);
        assert!(status.finish(new));
        assert_eq!(status.state(), BranchState::Closed);
    }

    #[test]
    fn test_finish_fails_when_paused() {
        let status = BranchStatus::new();
        let generation = status.begin_session();
        assert!(!status.finish(generation));
        assert_eq!(status.state(), BranchState::Open);
    }

    #[test]
    fn test_branch_plays_then_ends() {
        let status = Arc::new(BranchStatus::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut branch = Branch::new(BranchId::new(1), Arc::clone(&status), rx, 8);
        let (mut outbox, mut inbox) = outbox(8);

        let generation = status.begin_session();
        tx.send(BranchCommand::Load(file_chain(6, 0.5, generation))).unwrap();
        status.transition(&[BranchState::Open], BranchState::Playing).unwrap();
        tx.send(BranchCommand::Play).unwrap();

        branch.apply_commands(&mut outbox);
        let block = branch.pull(&mut outbox).unwrap();
        assert_eq!(block, &[0.5; 8]);

        let block = branch.pull(&mut outbox).unwrap();
        assert_eq!(block, &[0.5, 0.5, 0.5, 0.5, 0.0, 0.0, 0.0, 0.0]);
        assert!(!branch.is_playing());
        assert_eq!(status.state(), BranchState::Closed);

        assert_eq!(
            inbox.next_event(),
            Some(BranchEvent::Ended {
                branch: BranchId::new(1),
                generation
            })
        );
        assert_eq!(inbox.drain_retired(), 1);
    }

    #[test]
    fn test_paused_branch_is_not_pulled() {
        let status = Arc::new(BranchStatus::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut branch = Branch::new(BranchId::new(2), Arc::clone(&status), rx, 8);
        let (mut outbox, _inbox) = outbox(8);

        tx.send(BranchCommand::Load(file_chain(100, 0.5, 1))).unwrap();
        tx.send(BranchCommand::Play).unwrap();
        tx.send(BranchCommand::Pause).unwrap();
        branch.apply_commands(&mut outbox);

        assert!(branch.pull(&mut outbox).is_none());
    }

    #[test]
    fn test_reload_retires_previous_chain() {
        let status = Arc::new(BranchStatus::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut branch = Branch::new(BranchId::new(1), status, rx, 8);
        let (mut outbox, mut inbox) = outbox(8);

        tx.send(BranchCommand::Load(file_chain(100, 0.1, 1))).unwrap();
        tx.send(BranchCommand::Load(file_chain(100, 0.9, 2))).unwrap();
        tx.send(BranchCommand::Play).unwrap();
        branch.apply_commands(&mut outbox);

        assert_eq!(inbox.drain_retired(), 1);
        assert_eq!(branch.pull(&mut outbox).unwrap()[0], 0.9);
    }

    #[test]
    fn test_looping_branch_reports_restarts() {
        let status = Arc::new(BranchStatus::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let mut branch = Branch::new(BranchId::new(3), Arc::clone(&status), rx, 8);
        let (mut outbox, mut inbox) = outbox(8);

        let generation = status.begin_session();
        tx.send(BranchCommand::SetLoop(true)).unwrap();
        tx.send(BranchCommand::Load(file_chain(3, 0.5, generation))).unwrap();
        status.transition(&[BranchState::Open], BranchState::Playing).unwrap();
        tx.send(BranchCommand::Play).unwrap();
        branch.apply_commands(&mut outbox);

        for _ in 0..3 {
            assert!(branch.pull(&mut outbox).is_some());
        }
        assert!(branch.is_playing());
        assert_eq!(status.state(), BranchState::Playing);

        let mut last = 0;
        while let Some(event) = inbox.next_event() {
            if let BranchEvent::Restarted { restarts, .. } = event {
                last = restarts;
            }
        }
        assert_eq!(last, 3);
    }
}
