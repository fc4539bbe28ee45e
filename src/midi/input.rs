// MIDI Input - Raw messages from a midir port into the event queue

use log::{debug, info, warn};
use midir::{MidiInput as MidirInput, MidiInputConnection};
use ringbuf::traits::Producer;

use crate::messaging::channels::EventProducer;
use crate::messaging::event::Event;
use crate::midi::event::MidiEvent;

const CLIENT_NAME: &str = "loop_engine input";

/// Names of the available input ports
pub fn list_input_ports() -> Vec<String> {
    let Ok(midi_in) = MidirInput::new(CLIENT_NAME) else {
        return Vec::new();
    };
    midi_in
        .ports()
        .iter()
        .filter_map(|p| midi_in.port_name(p).ok())
        .collect()
}

pub struct MidiInput {
    port_name: Option<String>,
    connection: Option<MidiInputConnection<()>>,
}

impl MidiInput {
    /// Connect to the first port whose name contains `port_match` (the first
    /// port when `None`). No port is not an error: the engine runs without
    /// MIDI input.
    pub fn connect(port_match: Option<&str>, mut event_tx: EventProducer) -> Result<Self, String> {
        let mut midi_in =
            MidirInput::new(CLIENT_NAME).map_err(|e| format!("MIDI init error: {}", e))?;
        midi_in.ignore(midir::Ignore::All);

        let ports = midi_in.ports();
        for (i, port) in ports.iter().enumerate() {
            if let Ok(name) = midi_in.port_name(port) {
                debug!("[midiIn] port [{}] {}", i, name);
            }
        }

        let port = ports.iter().find(|p| match port_match {
            Some(wanted) => midi_in
                .port_name(p)
                .map(|name| name.contains(wanted))
                .unwrap_or(false),
            None => true,
        });
        let Some(port) = port else {
            info!("[midiIn] no matching MIDI input port, running without MIDI input");
            return Ok(Self {
                port_name: None,
                connection: None,
            });
        };
        let port_name = midi_in
            .port_name(port)
            .unwrap_or_else(|_| "Unknown".to_string());

        let connection = midi_in
            .connect(
                port,
                "loop-engine-in",
                move |_timestamp, message, _| {
                    // midir callback thread
                    if let Some(event) = MidiEvent::from_bytes(message) {
                        if event_tx.try_push(Event::Midi(event)).is_err() {
                            warn!("[midiIn] event queue full, message dropped");
                        }
                    }
                },
                (),
            )
            .map_err(|e| format!("MIDI connection error: {}", e))?;

        info!("[midiIn] connected to '{}'", port_name);
        Ok(Self {
            port_name: Some(port_name),
            connection: Some(connection),
        })
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}
