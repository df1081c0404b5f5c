//! bgm CLI — play a looping background track with fades.
//!
//! usage: bgm <track> [--config FILE] [--no-autoplay] [--fade-in MS]
//!            [--fade-out MS] [--volume V]
//!
//! Then type commands on stdin:
//!   play | pause | toggle (t) | mute (m) | vol <0.0-1.0> | state (s) | quit (q)

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use bgm_core::{AudioResource, Controller, ControllerConfig, NativeTrack, TimerScheduler};

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() || args.iter().any(|a| a == "-h" || a == "--help") {
        print_usage();
        return;
    }

    let config = match parse_args(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {}", e);
            print_usage();
            std::process::exit(2);
        }
    };

    match bgm_core::track::probe(&config.track) {
        Ok(info) => {
            let artist = info.artist.as_deref().unwrap_or("Unknown");
            let duration = info.duration_ms.map(format_ms).unwrap_or_else(|| "--:--".into());
            println!("  {} -- {}  [{}]  {} Hz, {} ch", info.title, artist, duration, info.sample_rate, info.channels);
        }
        Err(e) => eprintln!("warning: {}", e),
    }

    let frames = Arc::new(TimerScheduler::new());
    let controller = Controller::new(config, frames.clone(), || {
        Arc::new(NativeTrack::new()) as Arc<dyn AudioResource>
    });
    controller.initialize();

    run_repl(&controller);

    controller.dispose();
    frames.shutdown();
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

fn parse_args(args: &[String]) -> Result<ControllerConfig, String> {
    let mut track: Option<String> = None;
    let mut config: Option<ControllerConfig> = None;
    let mut auto_play: Option<bool> = None;
    let mut fade_in: Option<u64> = None;
    let mut fade_out: Option<u64> = None;
    let mut volume: Option<f32> = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let path = iter.next().ok_or("--config needs a file")?;
                config = Some(ControllerConfig::load(path).map_err(|e| e.to_string())?);
            }
            "--no-autoplay" => auto_play = Some(false),
            "--fade-in" => fade_in = Some(parse_value(iter.next(), "--fade-in")?),
            "--fade-out" => fade_out = Some(parse_value(iter.next(), "--fade-out")?),
            "--volume" => volume = Some(parse_value(iter.next(), "--volume")?),
            flag if flag.starts_with("--") => return Err(format!("unknown option: {}", flag)),
            path => {
                if track.is_some() {
                    return Err(format!("unexpected argument: {}", path));
                }
                track = Some(path.to_string());
            }
        }
    }

    // Flags override the config file, which overrides defaults.
    let mut config = config.unwrap_or_default();
    if let Some(track) = track {
        config.track = track;
    }
    if let Some(auto_play) = auto_play {
        config.auto_play = auto_play;
    }
    if let Some(ms) = fade_in {
        config.fade_in_ms = ms;
    }
    if let Some(ms) = fade_out {
        config.fade_out_ms = ms;
    }
    if let Some(v) = volume {
        config.volume = v;
    }
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn parse_value<T: std::str::FromStr>(raw: Option<&String>, flag: &str) -> Result<T, String> {
    let raw = raw.ok_or_else(|| format!("{} needs a value", flag))?;
    raw.parse()
        .map_err(|_| format!("invalid value for {}: {}", flag, raw))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Command {
    Play,
    Pause,
    Toggle,
    Mute,
    Volume(f32),
    State,
    Quit,
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let cmd = match head {
        "play" => Command::Play,
        "pause" => Command::Pause,
        "toggle" | "t" => Command::Toggle,
        "mute" | "m" => Command::Mute,
        "vol" | "volume" => {
            let raw = words.next().ok_or("usage: vol <0.0-1.0>")?;
            let v: f32 = raw.parse().map_err(|_| format!("not a number: {}", raw))?;
            Command::Volume(v)
        }
        "state" | "s" => Command::State,
        "quit" | "q" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(cmd))
}

fn run_repl(controller: &Controller) {
    let stdin = io::stdin();
    prompt();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match parse_command(&line) {
            Ok(Some(Command::Quit)) => break,
            Ok(Some(cmd)) => execute(controller, cmd),
            Ok(None) => {}
            Err(e) => eprintln!("{}", e),
        }
        if controller.needs_interaction() {
            println!("  playback was blocked; type `play` to retry");
        }
        prompt();
    }
}

fn execute(controller: &Controller, cmd: Command) {
    match cmd {
        Command::Play => {
            controller.play();
        }
        Command::Pause => {
            controller.pause();
        }
        Command::Toggle => {
            controller.toggle();
        }
        Command::Mute => {
            controller.toggle_mute();
            println!("  {}", if controller.is_muted() { "muted" } else { "unmuted" });
        }
        Command::Volume(v) => {
            controller.set_volume(v);
            println!("  vol: {}%", (controller.volume() * 100.0).round() as u32);
        }
        Command::State => print_state(controller),
        Command::Quit => {}
    }
}

fn print_state(controller: &Controller) {
    match serde_json::to_string_pretty(&controller.state()) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("state unavailable: {}", e),
    }
    println!("  output: {:.3}", controller.output_volume());
}

fn prompt() {
    print!("bgm> ");
    io::stdout().flush().ok();
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn print_usage() {
    println!("bgm - looping background music player");
    println!();
    println!("usage: bgm <track> [options]");
    println!();
    println!("options:");
    println!("  --config <file>     JSON config (track, auto_play, fade_in_ms, fade_out_ms, volume)");
    println!("  --no-autoplay       Wait for `play` instead of starting once loaded");
    println!("  --fade-in <ms>      Fade-in duration");
    println!("  --fade-out <ms>     Fade-out duration");
    println!("  --volume <0-1>      Target volume");
    println!();
    println!("commands (stdin):");
    println!("  play | pause | toggle (t) | mute (m) | vol <0-1> | state (s) | quit (q)");
}
