use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use log::{error, info, warn};
use ringbuf::traits::Consumer;

use loop_engine::audio::AudioBuffer;
use loop_engine::messaging::channels::NotificationConsumer;
use loop_engine::midi::input::list_input_ports;
use loop_engine::model::channel::SamplePlayMode;
use loop_engine::model::wave::Wave;
use loop_engine::{
    AudioHost, Engine, EngineConfig, EngineParts, InputRecMode, MidiInput, Notification,
    RecTriggerMode, create_notification_channel,
};

const NOTIFICATION_RINGBUFFER_CAPACITY: usize = 256;

const HELP: &str = "\
commands:
  play | stop | rewind        transport
  bpm <n>                     set tempo
  beats <beats> <bars>        set signature
  quantize <n>                quantizer subdivision, 0 disables
  metro                       toggle metronome
  tone <hz>                   add a looping one-loop sine channel
  key <id>                    press a channel key
  mute <id> | solo <id>       toggle mute or solo
  arm <id>                    toggle input recording arm
  rec                         toggle action recording
  input                       toggle input recording
  free | rigid                input recording mode
  signal | normal             recording trigger mode
  status                      show clock, peaks and recording
  ports                       list MIDI input ports
  quit";

fn print_notifications(rx: &mut NotificationConsumer) {
    while let Some(Notification {
        level,
        category,
        message,
        ..
    }) = rx.try_pop()
    {
        println!("[{:?}/{:?}] {}", level, category, message);
    }
}

/// One loop of a sine at `hz`
fn sine_wave(hz: f32, sample_rate: u32, frames: usize) -> Wave {
    let mut buffer = AudioBuffer::stereo(frames);
    for i in 0..frames {
        let phase = 2.0 * std::f32::consts::PI * hz * i as f32 / sample_rate as f32;
        let value = phase.sin() * 0.3;
        let frame = buffer.frame_mut(i);
        frame[0] = value;
        frame[1] = value;
    }
    Wave::new(format!("sine-{}", hz), sample_rate, buffer)
}

fn parse<T: std::str::FromStr>(arg: Option<&str>) -> Option<T> {
    arg.and_then(|a| a.parse().ok())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    println!("=== Loop Engine ===");

    let mut config = match EngineConfig::default_path() {
        Some(path) => EngineConfig::load_or_default(&path),
        None => EngineConfig::default(),
    };

    let (audio_notif_tx, mut audio_notif_rx) =
        create_notification_channel(NOTIFICATION_RINGBUFFER_CAPACITY);
    let mut host = match AudioHost::open(config.input_enabled) {
        Ok(host) => host,
        Err(e) => {
            error!("[main] {}", e);
            return;
        }
    };
    host.set_notifications(Arc::new(Mutex::new(audio_notif_tx)));
    if host.sample_rate() != config.sample_rate {
        info!(
            "[main] using device sample rate {} Hz instead of {} Hz",
            host.sample_rate(),
            config.sample_rate
        );
        config.sample_rate = host.sample_rate();
    }
    config.input_enabled = host.has_input();

    let EngineParts {
        mut engine,
        mixer,
        mut dispatcher,
    } = match Engine::new(config, None) {
        Ok(parts) => parts,
        Err(e) => {
            error!("[main] {}", e);
            return;
        }
    };

    let (notif_tx, mut notif_rx) = create_notification_channel(NOTIFICATION_RINGBUFFER_CAPACITY);
    dispatcher.set_notifications(notif_tx);

    engine.start_rendering();
    if let Err(e) = host.start(mixer, engine.render_info()) {
        error!("[main] {}", e);
        return;
    }

    let midi_port = engine.config().midi_in_port.clone();
    let midi_in = engine
        .take_midi_producer()
        .and_then(|tx| match MidiInput::connect(midi_port.as_deref(), tx) {
            Ok(input) => Some(input),
            Err(e) => {
                warn!("[main] {}", e);
                None
            }
        });

    let mut dispatcher = match dispatcher.spawn(engine.dispatcher_rate()) {
        Ok(handle) => handle,
        Err(e) => {
            error!("[main] cannot start the event dispatcher: {}", e);
            return;
        }
    };

    println!("{}", HELP);
    let stdin = io::stdin();
    loop {
        print!("> ");
        let _ = io::stdout().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let mut args = line.split_whitespace();
        let Some(command) = args.next() else {
            continue;
        };
        let arg = args.next();

        match command {
            "play" => {
                engine.start();
            }
            "stop" => {
                engine.stop();
            }
            "rewind" => {
                engine.rewind();
            }
            "bpm" => match parse::<f32>(arg) {
                Some(bpm) => engine.set_bpm(bpm),
                None => println!("usage: bpm <n>"),
            },
            "beats" => match (parse::<u32>(arg), parse::<u32>(args.next())) {
                (Some(beats), Some(bars)) => engine.set_beats(beats, bars),
                _ => println!("usage: beats <beats> <bars>"),
            },
            "quantize" => match parse::<u32>(arg) {
                Some(q) => engine.set_quantize(q),
                None => println!("usage: quantize <n>"),
            },
            "metro" => engine.toggle_metronome(),
            "tone" => match parse::<f32>(arg) {
                Some(hz) if hz > 0.0 => {
                    let (sample_rate, frames) = {
                        let model = engine.model().peek();
                        (engine.config().sample_rate, model.clock.frames_in_loop)
                    };
                    let handler = engine.mixer_handler();
                    let id = handler.add_and_load_channel("tone", sine_wave(hz, sample_rate, frames));
                    let _ = handler.set_mode(id, SamplePlayMode::Loop);
                    println!("channel {}", id);
                }
                _ => println!("usage: tone <hz>"),
            },
            "key" => match parse(arg) {
                Some(id) => {
                    engine.press(id);
                }
                None => println!("usage: key <id>"),
            },
            "mute" | "solo" => match parse(arg) {
                Some(id) => {
                    let model = engine.model().peek();
                    match model.channel(id) {
                        Some(ch) if command == "mute" => {
                            engine.set_mute(id, !ch.mute);
                        }
                        Some(ch) => {
                            engine.set_solo(id, !ch.solo);
                        }
                        None => println!("no channel {}", id),
                    }
                }
                None => println!("usage: {} <id>", command),
            },
            "arm" => match parse(arg) {
                Some(id) => {
                    if let Err(e) = engine.mixer_handler().toggle_arm(id) {
                        println!("{}", e);
                    }
                }
                None => println!("usage: arm <id>"),
            },
            "rec" => engine.toggle_action_rec(),
            "input" => {
                if let Err(e) = engine.toggle_input_rec() {
                    println!("{}", e);
                }
            }
            "free" => engine.set_input_rec_mode(InputRecMode::Free),
            "rigid" => engine.set_input_rec_mode(InputRecMode::Rigid),
            "signal" => engine.set_rec_trigger_mode(RecTriggerMode::Signal),
            "normal" => engine.set_rec_trigger_mode(RecTriggerMode::Normal),
            "status" => {
                let clock = engine.clock();
                let out = engine.peak_out();
                println!(
                    "{:?} {:.2}s frame {} beat {} quantize {} | out {:.2}/{:.2} | audio {:?}",
                    engine.status(),
                    clock.current_second(),
                    clock.current_frame(),
                    clock.current_beat(),
                    clock.quantize_value(),
                    out.left,
                    out.right,
                    host.status()
                );
                if engine.rec_manager().is_recording_input() {
                    let rec = engine.mixer().record_info();
                    println!("input rec {}/{} frames", rec.position, rec.max_length);
                }
            }
            "ports" => {
                for (i, name) in list_input_ports().iter().enumerate() {
                    println!("  {}: {}", i, name);
                }
                match midi_in.as_ref().filter(|m| m.is_connected()) {
                    Some(m) => println!("midi in: {}", m.port_name().unwrap_or("?")),
                    None => println!("midi in: not connected"),
                }
            }
            "quit" | "exit" => break,
            "help" => println!("{}", HELP),
            other => println!("unknown command '{}', try help", other),
        }

        print_notifications(&mut audio_notif_rx);
        print_notifications(&mut notif_rx);
    }

    dispatcher.stop();
    engine.shutdown();
    info!("[main] bye");
}
