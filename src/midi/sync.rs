// MIDI sync output - Clock and time code for external gear
//
// The audio thread only formats messages (`SyncTicker`) and pushes them into
// a ring buffer. A worker thread drains it into the MIDI output. Start and
// stop come from control threads and go straight to the output
// (`SyncControl`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{info, warn};
use midir::{MidiOutput, MidiOutputConnection};
use ringbuf::traits::{Consumer, Producer};

use crate::conf::SyncMode;
use crate::midi::event::{MIDI_CLOCK, MIDI_MTC_QUARTER, MIDI_POSITION_PTR, MIDI_START, MIDI_STOP};
use crate::model::Frame;
use crate::sequencer::clock::ClockStatus;

pub type SyncProducer = ringbuf::HeapProd<SyncMessage>;
pub type SyncConsumer = ringbuf::HeapCons<SyncMessage>;

/// MTC full frame: locate to 00:00:00:00
pub const MTC_FULL_FRAME_REWIND: [u8; 10] = [0xF0, 0x7F, 0x7F, 0x01, 0x01, 0x00, 0x00, 0x00, 0x00, 0xF7];

/// Song position pointer to the song start
pub const SPP_REWIND: [u8; 3] = [MIDI_POSITION_PTR, 0x00, 0x00];

/// Raw MIDI message small enough to cross the ring buffer by value
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SyncMessage {
    bytes: [u8; 10],
    len: u8,
}

impl SyncMessage {
    /// Messages longer than 10 bytes are truncated
    pub fn new(data: &[u8]) -> Self {
        let len = data.len().min(10);
        let mut bytes = [0u8; 10];
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl std::fmt::Debug for SyncMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyncMessage({:02X?})", self.as_bytes())
    }
}

/// Anything raw MIDI bytes can be written to
pub trait MidiSink: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), String>;
}

pub type SharedSink = Arc<Mutex<Box<dyn MidiSink>>>;

pub fn shared_sink(sink: impl MidiSink + 'static) -> SharedSink {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// MIDI output port through midir
pub struct MidirSink {
    connection: MidiOutputConnection,
}

impl MidirSink {
    /// Connect to the first output port whose name contains `port_match`
    /// (case-insensitive), or the first port when `None`
    pub fn connect(port_match: Option<&str>) -> Option<Self> {
        let midi_out = match MidiOutput::new("loop-engine-sync-out") {
            Ok(out) => out,
            Err(e) => {
                warn!("[midiSync] failed to initialize output: {}", e);
                return None;
            }
        };

        let ports = midi_out.ports();
        let port = match port_match {
            Some(pattern) => {
                let pattern = pattern.to_lowercase();
                ports.iter().find(|p| {
                    midi_out
                        .port_name(p)
                        .map(|name| name.to_lowercase().contains(&pattern))
                        .unwrap_or(false)
                })?
            }
            None => ports.first()?,
        };
        let name = midi_out
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        match midi_out.connect(port, "loop-engine-sync") {
            Ok(connection) => {
                info!("[midiSync] connected to output port {}", name);
                Some(Self { connection })
            }
            Err(e) => {
                warn!("[midiSync] failed to connect to {}: {}", name, e);
                None
            }
        }
    }
}

impl MidiSink for MidirSink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.connection.send(bytes).map_err(|e| e.to_string())
    }
}

/// Keeps every message in memory
#[derive(Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<Vec<u8>> {
        self.sent.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl MidiSink for MemorySink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), String> {
        self.sent
            .lock()
            .map_err(|e| e.to_string())?
            .push(bytes.to_vec());
        Ok(())
    }
}

fn send_to(sink: &SharedSink, bytes: &[u8]) {
    let Ok(mut sink) = sink.lock() else {
        return;
    };
    if let Err(e) = sink.send(bytes) {
        warn!("[midiSync] send failed: {}", e);
    }
}

/// Control-side sync output: transport start and stop
pub struct SyncControl {
    mode: SyncMode,
    sink: Option<SharedSink>,
}

impl SyncControl {
    pub fn new(mode: SyncMode, sink: Option<SharedSink>) -> Self {
        Self { mode, sink }
    }

    /// Sends nothing
    pub fn disabled() -> Self {
        Self::new(SyncMode::None, None)
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// MIDI start followed by a song position pointer to the top
    pub fn send_start(&self) {
        if self.mode != SyncMode::ClockMaster {
            return;
        }
        if let Some(sink) = &self.sink {
            send_to(sink, &[MIDI_START]);
            send_to(sink, &SPP_REWIND);
        }
    }

    pub fn send_stop(&self) {
        if self.mode != SyncMode::ClockMaster {
            return;
        }
        if let Some(sink) = &self.sink {
            send_to(sink, &[MIDI_STOP]);
        }
    }
}

/// SMPTE position sent as MTC quarter frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct MtcTime {
    frames: u8,
    seconds: u8,
    minutes: u8,
    hours: u8,
}

impl MtcTime {
    fn advance(&mut self, fps: u8) {
        self.frames += 1;
        if self.frames < fps {
            return;
        }
        self.frames = 0;
        self.seconds += 1;
        if self.seconds < 60 {
            return;
        }
        self.seconds = 0;
        self.minutes += 1;
        if self.minutes < 60 {
            return;
        }
        self.minutes = 0;
        self.hours = (self.hours + 1) % 24;
    }
}

/// MTC rate code carried in the hours high nibble
fn mtc_rate_code(fps: f32) -> u8 {
    match fps.round() as u32 {
        24 => 0,
        25 => 1,
        30 if fps < 30.0 => 2,
        _ => 3,
    }
}

/// Audio-thread side of the sync output
pub struct SyncTicker {
    mode: SyncMode,
    fps: f32,
    /// Frames between two MTC frames
    mtc_rate: Frame,
    mtc: MtcTime,
    producer: Option<SyncProducer>,
    dropped: usize,
}

impl SyncTicker {
    pub fn new(mode: SyncMode, fps: f32, sample_rate: u32, producer: Option<SyncProducer>) -> Self {
        let fps = if fps > 0.0 { fps } else { 25.0 };
        Self {
            mode,
            fps,
            mtc_rate: ((sample_rate as f32 / fps) as Frame).max(1),
            mtc: MtcTime::default(),
            producer,
            dropped: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(SyncMode::None, 25.0, 44100, None)
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Messages lost to a full queue
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    fn push(&mut self, bytes: &[u8]) {
        let Some(producer) = self.producer.as_mut() else {
            return;
        };
        if producer.try_push(SyncMessage::new(bytes)).is_err() {
            self.dropped += 1;
        }
    }

    /// Called once per frame with the wrapped transport position
    #[inline]
    pub fn tick(&mut self, status: ClockStatus, global_frame: Frame, frames_in_beat: Frame) {
        if status == ClockStatus::Waiting {
            return;
        }
        match self.mode {
            SyncMode::None => {}
            SyncMode::ClockMaster => {
                let pulse = frames_in_beat / 24;
                if pulse > 0 && global_frame % pulse == 0 {
                    self.push(&[MIDI_CLOCK]);
                }
            }
            SyncMode::MtcMaster => {
                if global_frame % self.mtc_rate == 0 {
                    self.send_quarter_frames();
                }
            }
        }
    }

    /// Four quarter-frame messages per MTC frame: even frames carry pieces
    /// 0-3 (frames, seconds), odd frames pieces 4-7 (minutes, hours)
    fn send_quarter_frames(&mut self) {
        let t = self.mtc;
        let hours_high = ((t.hours >> 4) & 0x01) | (mtc_rate_code(self.fps) << 1);
        let pieces: [(u8, u8); 4] = if t.frames % 2 == 0 {
            [
                (0, t.frames & 0x0F),
                (1, t.frames >> 4),
                (2, t.seconds & 0x0F),
                (3, t.seconds >> 4),
            ]
        } else {
            [
                (4, t.minutes & 0x0F),
                (5, t.minutes >> 4),
                (6, t.hours & 0x0F),
                (7, hours_high),
            ]
        };
        for (piece, nibble) in pieces {
            self.push(&[MIDI_MTC_QUARTER, (piece << 4) | (nibble & 0x0F)]);
        }
        self.mtc.advance(self.fps.round() as u8);
    }

    /// Tell receivers the transport went back to the start
    pub fn rewind(&mut self) {
        self.mtc = MtcTime::default();
        match self.mode {
            SyncMode::None => {}
            SyncMode::ClockMaster => self.push(&SPP_REWIND),
            SyncMode::MtcMaster => self.push(&MTC_FULL_FRAME_REWIND),
        }
    }
}

/// Drains the sync queue into the output port
pub struct MidiOutWorker {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MidiOutWorker {
    pub fn spawn(mut consumer: SyncConsumer, sink: SharedSink) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("midi-sync-out".to_string())
            .spawn(move || {
                while flag.load(Ordering::Relaxed) {
                    let mut idle = true;
                    while let Some(message) = consumer.try_pop() {
                        send_to(&sink, message.as_bytes());
                        idle = false;
                    }
                    if idle {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })?;
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MidiOutWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::channels::create_sync_channel;

    fn drain(consumer: &mut SyncConsumer) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(m) = consumer.try_pop() {
            out.push(m.as_bytes().to_vec());
        }
        out
    }

    #[test]
    fn test_clock_pulses_per_beat() {
        let (tx, mut rx) = create_sync_channel(256);
        let mut ticker = SyncTicker::new(SyncMode::ClockMaster, 25.0, 44100, Some(tx));
        let beat = 22050;
        for frame in 0..beat {
            ticker.tick(ClockStatus::Running, frame, beat);
        }
        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 24);
        assert!(sent.iter().all(|m| m == &vec![MIDI_CLOCK]));
    }

    #[test]
    fn test_nothing_sent_while_waiting() {
        let (tx, mut rx) = create_sync_channel(16);
        let mut ticker = SyncTicker::new(SyncMode::ClockMaster, 25.0, 44100, Some(tx));
        ticker.tick(ClockStatus::Waiting, 0, 22050);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_mtc_quarter_frames() {
        let (tx, mut rx) = create_sync_channel(64);
        let mut ticker = SyncTicker::new(SyncMode::MtcMaster, 25.0, 44100, Some(tx));
        let rate = 44100 / 25;
        ticker.tick(ClockStatus::Running, 0, 22050);
        ticker.tick(ClockStatus::Running, 1, 22050);
        ticker.tick(ClockStatus::Running, rate, 22050);

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 8);
        assert_eq!(sent[0], vec![MIDI_MTC_QUARTER, 0x00]);
        assert_eq!(sent[3], vec![MIDI_MTC_QUARTER, 0x30]);
        assert_eq!(sent[4], vec![MIDI_MTC_QUARTER, 0x40]);
        // 25 fps rate code in the last piece
        assert_eq!(sent[7], vec![MIDI_MTC_QUARTER, 0x72]);
    }

    #[test]
    fn test_rewind_messages() {
        let (tx, mut rx) = create_sync_channel(16);
        let mut mtc = SyncTicker::new(SyncMode::MtcMaster, 25.0, 44100, Some(tx));
        mtc.rewind();
        assert_eq!(drain(&mut rx), vec![MTC_FULL_FRAME_REWIND.to_vec()]);

        let (tx, mut rx) = create_sync_channel(16);
        let mut clock = SyncTicker::new(SyncMode::ClockMaster, 25.0, 44100, Some(tx));
        clock.rewind();
        assert_eq!(drain(&mut rx), vec![SPP_REWIND.to_vec()]);
    }

    #[test]
    fn test_full_queue_counts_drops() {
        let (tx, _rx) = create_sync_channel(1);
        let mut ticker = SyncTicker::new(SyncMode::ClockMaster, 25.0, 44100, Some(tx));
        ticker.rewind();
        ticker.rewind();
        assert_eq!(ticker.dropped(), 1);
    }

    #[test]
    fn test_control_start_stop() {
        let sink = MemorySink::new();
        let control = SyncControl::new(SyncMode::ClockMaster, Some(shared_sink(sink.clone())));
        control.send_start();
        control.send_stop();
        assert_eq!(
            sink.messages(),
            vec![vec![MIDI_START], SPP_REWIND.to_vec(), vec![MIDI_STOP]]
        );

        let quiet = MemorySink::new();
        let mtc = SyncControl::new(SyncMode::MtcMaster, Some(shared_sink(quiet.clone())));
        mtc.send_start();
        assert!(quiet.messages().is_empty());
    }

    #[test]
    fn test_worker_forwards_queue() {
        let (mut tx, rx) = create_sync_channel(16);
        let sink = MemorySink::new();
        let mut worker = MidiOutWorker::spawn(rx, shared_sink(sink.clone())).unwrap();
        tx.try_push(SyncMessage::new(&[MIDI_CLOCK])).unwrap();

        for _ in 0..200 {
            if !sink.messages().is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        worker.stop();
        assert_eq!(sink.messages(), vec![vec![MIDI_CLOCK]]);
    }
}
