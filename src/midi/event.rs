// MIDI types events
//
// Events are kept as a packed 32-bit word `status << 24 | data1 << 16 | data2 << 8`.
// This is also the form stored in the persisted action log.

use std::fmt;

pub const NOTE_OFF: u8 = 0x80;
pub const NOTE_ON: u8 = 0x90;
pub const POLY_AFTERTOUCH: u8 = 0xA0;
pub const CONTROL_CHANGE: u8 = 0xB0;
pub const PITCH_BEND: u8 = 0xE0;

// System real-time / common messages used by the sync sender
pub const MIDI_CLOCK: u8 = 0xF8;
pub const MIDI_START: u8 = 0xFA;
pub const MIDI_STOP: u8 = 0xFC;
pub const MIDI_POSITION_PTR: u8 = 0xF2;
pub const MIDI_MTC_QUARTER: u8 = 0xF1;
pub const MIDI_SYSEX: u8 = 0xF0;
pub const MIDI_EOX: u8 = 0xF7;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MidiEvent {
    raw: u32,
}

impl MidiEvent {
    pub const fn from_raw(raw: u32) -> Self {
        Self { raw }
    }

    pub const fn new(status: u8, data1: u8, data2: u8) -> Self {
        Self {
            raw: (status as u32) << 24 | (data1 as u32) << 16 | (data2 as u32) << 8,
        }
    }

    pub const fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(NOTE_ON | (channel & 0x0F), note & 0x7F, velocity & 0x7F)
    }

    pub const fn note_off(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(NOTE_OFF | (channel & 0x0F), note & 0x7F, velocity & 0x7F)
    }

    /// Parse un RAW MIDI message (1 to 3 bytes)
    ///
    /// Note On with velocity 0 is normalized to Note Off. Running status and
    /// SysEx streams are not supported.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;
        if status & 0x80 == 0 {
            return None;
        }
        let data1 = bytes.get(1).copied().unwrap_or(0);
        let data2 = bytes.get(2).copied().unwrap_or(0);

        match status & 0xF0 {
            NOTE_ON | NOTE_OFF | POLY_AFTERTOUCH | CONTROL_CHANGE | PITCH_BEND
                if bytes.len() < 3 =>
            {
                None
            }
            NOTE_ON if data2 == 0 => Some(Self::note_off(status & 0x0F, data1, 0)),
            _ => Some(Self::new(status, data1, data2)),
        }
    }

    #[inline]
    pub fn raw(&self) -> u32 {
        self.raw
    }

    /// Status byte without the channel nibble (e.g. 0x90 for any Note On)
    #[inline]
    pub fn status(&self) -> u8 {
        ((self.raw >> 24) & 0xF0) as u8
    }

    /// Full status byte, channel included
    #[inline]
    pub fn status_byte(&self) -> u8 {
        (self.raw >> 24) as u8
    }

    #[inline]
    pub fn channel(&self) -> u8 {
        ((self.raw >> 24) & 0x0F) as u8
    }

    #[inline]
    pub fn note(&self) -> u8 {
        ((self.raw >> 16) & 0xFF) as u8
    }

    #[inline]
    pub fn velocity(&self) -> u8 {
        ((self.raw >> 8) & 0xFF) as u8
    }

    #[inline]
    pub fn data1(&self) -> u8 {
        self.note()
    }

    #[inline]
    pub fn data2(&self) -> u8 {
        self.velocity()
    }

    pub fn is_note_on(&self) -> bool {
        self.status() == NOTE_ON
    }

    pub fn is_note_off(&self) -> bool {
        self.status() == NOTE_OFF
    }

    pub fn is_note_on_off(&self) -> bool {
        self.is_note_on() || self.is_note_off()
    }

    pub fn with_velocity(&self, velocity: u8) -> Self {
        Self::new(self.status_byte(), self.note(), velocity & 0x7F)
    }

    /// The three bytes to put on the wire
    pub fn to_bytes(&self) -> [u8; 3] {
        [self.status_byte(), self.data1(), self.data2()]
    }
}

impl fmt::Debug for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MidiEvent({:#04X} {} {})",
            self.status_byte(),
            self.data1(),
            self.data2()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_on() {
        let event = MidiEvent::from_bytes(&[0x91, 60, 100]).unwrap();
        assert!(event.is_note_on());
        assert_eq!(event.channel(), 1);
        assert_eq!(event.note(), 60);
        assert_eq!(event.velocity(), 100);
    }

    #[test]
    fn test_note_off_velocity_zero() {
        // Note on with velocity 0 is a note off
        let event = MidiEvent::from_bytes(&[0x90, 64, 0]).unwrap();
        assert!(event.is_note_off());
        assert_eq!(event.note(), 64);
    }

    #[test]
    fn test_raw_word_layout() {
        let event = MidiEvent::new(0x90, 60, 127);
        assert_eq!(event.raw(), 0x903C7F00);
        assert_eq!(MidiEvent::from_raw(0x903C7F00), event);
        assert_eq!(event.to_bytes(), [0x90, 60, 127]);
    }

    #[test]
    fn test_short_messages() {
        assert!(MidiEvent::from_bytes(&[]).is_none());
        assert!(MidiEvent::from_bytes(&[0x90, 60]).is_none());
        assert!(MidiEvent::from_bytes(&[0x3C]).is_none());

        let clock = MidiEvent::from_bytes(&[MIDI_CLOCK]).unwrap();
        assert_eq!(clock.status_byte(), MIDI_CLOCK);
    }

    #[test]
    fn test_control_change() {
        let event = MidiEvent::from_bytes(&[0xB0, 7, 127]).unwrap();
        assert_eq!(event.status(), CONTROL_CHANGE);
        assert_eq!(event.data1(), 7);
        assert_eq!(event.data2(), 127);
    }

    #[test]
    fn test_with_velocity_keeps_channel() {
        let event = MidiEvent::note_on(3, 48, 10).with_velocity(90);
        assert_eq!(event.channel(), 3);
        assert_eq!(event.velocity(), 90);
    }
}
