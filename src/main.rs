//! midiplay - Standalone host for the MIDI and audio player.
//!
//! Plays an audio file through the default output device while forwarding
//! one track of a MIDI file to a hardware MIDI port.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- --midi song.mid --audio backing.wav --track 1
//! ```
//!
//! Commands are read from stdin; type `help` for the list.

use anyhow::{Context, Result};
use midiplay::midi::{
    connect_output, drain_block, is_note_on, output_port_names, EventQueue, MidiBuffer,
};
use midiplay::{Player, PlayerConfig, PlayerHandle};
use midir::MidiOutputConnection;
use parking_lot::Mutex;
use rodio::{OutputStream, Source};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Command-line options for the application.
struct CliOptions {
    midi: Option<PathBuf>,
    audio: Option<PathBuf>,
    track: Option<usize>,
    /// Substring of the MIDI output port name.
    port: Option<String>,
    config: Option<PathBuf>,
    /// Settings file restored on start and written on quit.
    state: Option<PathBuf>,
    list_ports: bool,
}

impl CliOptions {
    /// Parses command-line arguments.
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut options = CliOptions {
            midi: None,
            audio: None,
            track: None,
            port: None,
            config: None,
            state: None,
            list_ports: false,
        };
        let mut i = 1;

        while i < args.len() {
            let flag = args[i].as_str();
            let mut value = || -> Result<String> {
                i += 1;
                args.get(i)
                    .cloned()
                    .with_context(|| format!("{} requires an argument", flag))
            };

            match flag {
                "--midi" | "-m" => options.midi = Some(PathBuf::from(value()?)),
                "--audio" | "-a" => options.audio = Some(PathBuf::from(value()?)),
                "--track" | "-t" => {
                    let track = value()?;
                    options.track = Some(track.parse().with_context(|| format!("invalid track index: {}", track))?);
                }
                "--port" | "-p" => options.port = Some(value()?),
                "--config" | "-c" => options.config = Some(PathBuf::from(value()?)),
                "--state" | "-s" => options.state = Some(PathBuf::from(value()?)),
                "--list-ports" => options.list_ports = true,
                "--help" | "-h" => {
                    print_usage(args.first().map(String::as_str).unwrap_or("midiplay"));
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown option: {}", other);
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
            i += 1;
        }

        Ok(options)
    }
}

fn print_usage(program: &str) {
    eprintln!("midiplay - MIDI and audio file player");
    eprintln!();
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -m, --midi PATH      Load a Standard MIDI File");
    eprintln!("  -a, --audio PATH     Load an audio file (WAV, FLAC, Ogg, MP3)");
    eprintln!("  -t, --track N        Select the MIDI track to forward");
    eprintln!("  -p, --port NAME      MIDI output port (substring match)");
    eprintln!("  -c, --config PATH    Load player config (JSON)");
    eprintln!("  -s, --state PATH     Restore settings on start, save them on quit");
    eprintln!("      --list-ports     List MIDI output ports and exit");
    eprintln!("  -h, --help           Print this help message");
}

/// Events forwarded by the sink during a block.
///
/// The sink and [`PlayerSource`] both run on the audio callback, so the
/// lock is uncontended; it is still only ever tried.
type SharedQueue = Arc<Mutex<EventQueue>>;

/// Preallocated room for one block of forwarded events.
const QUEUED_EVENTS: usize = 1024;
const QUEUED_BYTES: usize = 8192;

/// rodio source that drives the player one block at a time.
struct PlayerSource {
    player: Player,
    midi_out: MidiBuffer,
    port: Option<MidiOutputConnection>,
    events: SharedQueue,
    block: Vec<f32>,
    pos: usize,
    sample_rate: u32,
}

impl PlayerSource {
    fn new(
        player: Player,
        port: Option<MidiOutputConnection>,
        events: SharedQueue,
        sample_rate: u32,
    ) -> Self {
        let block = vec![0.0; player.block_len()];
        let midi_out = player.midi_buffer();
        Self {
            pos: block.len(),
            player,
            midi_out,
            port,
            events,
            block,
            sample_rate,
        }
    }

    fn render_block(&mut self) {
        self.midi_out.clear();
        self.player.process(&mut self.block, &mut self.midi_out);

        // Flushes must reach the port before the block's events.
        if let (Some(conn), Some(mut events)) = (self.port.as_mut(), self.events.try_lock()) {
            drain_block(&mut self.midi_out, &mut events, |bytes| {
                let _ = conn.send(bytes);
            });
        }
        self.pos = 0;
    }
}

impl Iterator for PlayerSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos >= self.block.len() {
            self.render_block();
        }
        let sample = self.block[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for PlayerSource {
    fn current_frame_len(&self) -> Option<usize> {
        None // Continuous stream
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

fn main() -> Result<()> {
    let cli = CliOptions::parse()?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    if cli.port.is_some() {
        config.midi_port = cli.port.clone();
    }

    if cli.list_ports {
        for name in output_port_names(&config.client_name).context("Failed to query MIDI ports")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let port = match connect_output(&config.client_name, config.midi_port.as_deref()) {
        Ok(conn) => Some(conn),
        Err(e) => {
            tracing::warn!("MIDI output disabled: {}", e);
            None
        }
    };

    let sample_rate = config.sample_rate;
    let block_size = config.block_size;
    let (mut player, handle) = Player::new(config);
    let notes_forwarded = Arc::new(AtomicU64::new(0));
    let events: SharedQueue = Arc::new(Mutex::new(EventQueue::with_capacity(
        QUEUED_EVENTS,
        QUEUED_BYTES,
    )));

    if port.is_some() {
        let queue = Arc::clone(&events);
        let counter = Arc::clone(&notes_forwarded);
        handle
            .set_sink(Some(Box::new(move |bytes: &[u8]| {
                if is_note_on(bytes) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(mut queue) = queue.try_lock() {
                    queue.push(bytes);
                }
            })))
            .context("Failed to install MIDI sink")?;
    }

    if let Some(path) = &cli.state {
        if path.is_file() {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings {}", path.display()))?;
            handle.restore_state(&json).context("Failed to restore settings")?;
        }
    }
    if let Some(path) = &cli.midi {
        handle
            .load_midi_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
    }
    if let Some(track) = cli.track {
        handle.select_track(track).context("Failed to select track")?;
    }
    if let Some(path) = &cli.audio {
        handle
            .load_audio_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
    }

    let (_stream, stream_handle) =
        OutputStream::try_default().context("Failed to open audio output")?;
    player.prepare(f64::from(sample_rate), block_size);
    stream_handle
        .play_raw(PlayerSource::new(player, port, events, sample_rate))
        .context("Failed to start audio playback")?;

    run_repl(&handle, &notes_forwarded)?;

    handle.stop();
    if let Some(path) = &cli.state {
        save_settings(&handle, path)?;
    }
    Ok(())
}

fn save_settings(handle: &PlayerHandle, path: &Path) -> Result<()> {
    let json = handle.save_state().context("Failed to serialize settings")?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Saved settings to {}", path.display());
    Ok(())
}

fn run_repl(handle: &PlayerHandle, notes_forwarded: &AtomicU64) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        let mut parts = line.trim().splitn(2, ' ');
        let command = parts.next().unwrap_or_default();
        let arg = parts.next().map(str::trim).unwrap_or_default();

        match command {
            "" => {}
            "play" => handle.play(),
            "stop" => handle.stop(),
            "track" => match arg.parse::<usize>() {
                Ok(index) => {
                    if let Err(e) = handle.select_track(index) {
                        println!("{}", e);
                    }
                }
                Err(_) => println!("usage: track N"),
            },
            "midi" => {
                if let Err(e) = handle.load_midi_file(arg) {
                    println!("{}", e);
                }
            }
            "audio" => {
                if let Err(e) = handle.load_audio_file(arg) {
                    println!("{}", e);
                }
            }
            "save" => {
                if let Err(e) = save_settings(handle, Path::new(arg)) {
                    println!("{:#}", e);
                }
            }
            "status" => print_status(handle, notes_forwarded),
            "quit" | "exit" | "q" => return Ok(()),
            "help" | "?" => {
                println!("play | stop | track N | midi PATH | audio PATH | save PATH | status | quit");
            }
            other => println!("unknown command: {} (try help)", other),
        }
        handle.collect_retired();
    }
}

fn print_status(handle: &PlayerHandle, notes_forwarded: &AtomicU64) {
    let state = handle.playback_state();
    println!(
        "transport: {} {:.2}s / {:.2}s",
        if handle.is_playing() { "playing" } else { "stopped" },
        handle.position_seconds(),
        handle.length_seconds()
    );
    match handle.current_audio_file() {
        Some(path) => println!("audio: {}", path.display()),
        None => println!("audio: none"),
    }
    if state.track_count == 0 {
        println!("midi: none");
    } else {
        let (name, end) = handle.current_track_info().unwrap_or((None, 0.0));
        println!(
            "midi: track {}/{} {} ({:.2}s)",
            state.current_track,
            state.track_count,
            name.as_deref().unwrap_or("untitled"),
            end
        );
    }
    println!(
        "sounding: {}, note-ons forwarded: {}",
        state.sounding,
        notes_forwarded.load(Ordering::Relaxed)
    );
}
