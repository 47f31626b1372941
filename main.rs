use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use minifb::{Key, KeyRepeat, Window, WindowOptions};
use tracing_subscriber::EnvFilter;

use scanline_racer::assets::{AssetId, AssetRegistry};
use scanline_racer::config::RaceConfig;
use scanline_racer::constants::{DEFAULT_HEIGHT, DEFAULT_WIDTH};
use scanline_racer::engine::{FinishCallback, FinishReport, SystemClock};
use scanline_racer::net::{Transport, UdpTransport};
use scanline_racer::projection::Viewport;
use scanline_racer::surface::FrameBuffer;
use scanline_racer::theme::{map_theme, MAPS};
use scanline_racer::{Difficulty, RaceEngine, RaceOptions, RaceState};

#[derive(Parser, Debug)]
#[command(name = "scanline-racer", about = "Pseudo-3D kart racer")]
struct Cli {
    #[arg(long, value_enum, default_value_t = Difficulty::Easy)]
    difficulty: Difficulty,
    #[arg(long, default_value = "sawit-plants")]
    map: String,
    #[arg(long, default_value = "mario")]
    character: String,
    #[arg(long, default_value = "player")]
    player_id: String,
    #[arg(long, default_value = "Player")]
    name: String,
    /// Multiplayer room to join; needs --relay.
    #[arg(long)]
    session: Option<String>,
    /// UDP relay address for multiplayer sessions.
    #[arg(long)]
    relay: Option<SocketAddr>,
    /// TOML file overriding race tuning.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding `sprites/` and `characters/`; generated art otherwise.
    #[arg(long)]
    assets: Option<PathBuf>,
    #[arg(long)]
    seed: Option<u64>,
    /// Score reported alongside the finish time.
    #[arg(long, default_value_t = 0)]
    score: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RaceConfig::load(path)?,
        None => RaceConfig::default(),
    };

    let transport: Option<Box<dyn Transport>> = match (&cli.session, cli.relay) {
        (Some(_), Some(relay)) => Some(Box::new(
            UdpTransport::connect(relay).with_context(|| format!("connecting to relay {}", relay))?,
        )),
        (Some(session), None) => {
            tracing::warn!("No relay given; racing session {} solo", session);
            None
        }
        _ => None,
    };

    let mut window = Window::new(
        "Scanline Racer",
        DEFAULT_WIDTH,
        DEFAULT_HEIGHT,
        WindowOptions {
            resize: true,
            scale: minifb::Scale::X1,
            ..WindowOptions::default()
        },
    )?;
    window.limit_update_rate(Some(Duration::from_micros(16_600)));

    let options = RaceOptions {
        character_id: cli.character.clone(),
        local_player_id: cli.player_id.clone(),
        player_name: cli.name.clone(),
        session_id: cli.session.clone(),
        difficulty: cli.difficulty,
        map_id: cli.map.clone(),
        seed: cli.seed,
    };
    let on_finish: FinishCallback = Box::new(|report: FinishReport| {
        tracing::info!("Crossed the line in {:.2}s", report.time);
    });
    let mut engine = RaceEngine::new(
        Viewport::new(DEFAULT_WIDTH, DEFAULT_HEIGHT),
        options,
        Some(on_finish),
        transport,
        Box::new(SystemClock::default()),
        config,
    )?;
    engine.set_assets(AssetRegistry::spawn(cli.assets.clone(), AssetId::race_set()));
    let keyboard = engine.bind_keyboard()?;

    let mut map_index = MAPS.iter().position(|m| m.id == map_theme(&cli.map).id).unwrap_or(0);
    let mut frame = FrameBuffer::new(DEFAULT_WIDTH, DEFAULT_HEIGHT);
    let mut reported = false;

    while window.is_open() && !window.is_key_down(Key::Escape) {
        let (width, height) = window.get_size();
        if width == 0 || height == 0 {
            // minimised
            window.update();
            continue;
        }
        frame.resize(width, height);

        if window.is_key_pressed(Key::T, KeyRepeat::No) {
            map_index = (map_index + 1) % MAPS.len();
            engine.load_track(MAPS[map_index].id);
        }

        keyboard.poll_window(&window);
        engine.frame(&mut frame);

        if engine.state() == RaceState::Finished && !reported {
            reported = true;
            if let Some(submission) = engine.report_finish(cli.score) {
                tracing::info!("Result {:.2}s, score {}", submission.time, submission.score);
            }
        }

        let rank = engine
            .local_rank()
            .map(|r| format!(" - P{}", r))
            .unwrap_or_default();
        window.set_title(&format!(
            "Scanline Racer - {} km/h - NOS {:.0}%{}",
            (engine.speed() / 100.0).round(),
            engine.nos(),
            rank
        ));

        window
            .update_with_buffer(frame.color_buffer(), width, height)
            .context("presenting frame")?;
    }

    drop(keyboard);
    engine.destroy();
    Ok(())
}
