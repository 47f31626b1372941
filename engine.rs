//! The racing engine.
//!
//! [`RaceEngine`] owns the track, the hazard field, the driver input hub and
//! an optional [`Transport`]. The host calls [`RaceEngine::frame`] once per
//! presented frame; it advances the simulation by the clamped wall-clock
//! delta and draws the scene into a [`Surface`].

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;

use crate::assets::{AssetId, AssetRegistry};
use crate::config::RaceConfig;
use crate::constants::{CAMERA_DEPTH, CAMERA_HEIGHT, DRAW_DISTANCE, LANES, ROAD_WIDTH, SEGMENT_LENGTH};
use crate::hud::{self, HudSnapshot};
use crate::input::{DirectionalInput, InputHub, KeyboardAdapter};
use crate::math::{ease_out, lerp, ring_delta, wrap, Color, Lcg};
use crate::net::{
    FinishSubmission, LiveRanking, PlayerIdentity, PositionBroadcast, RemoteSnapshot, Transport,
    LIVE_RANKINGS, PLAYER_FINISHED, RACE_UPDATE,
};
use crate::obstacles::ObstacleField;
use crate::projection::{draw_checkered_segment, draw_segment, project, Camera, Edge, SegmentPaint, Viewport};
use crate::surface::{Blit, Rect, Surface, Transform2};
use crate::theme::{character_index, map_theme, MapTheme, CHARACTERS};
use crate::track::{Difficulty, Scenery, Track};

const NOS_MAX: f32 = 100.0;
const SKY_BANDS: usize = 24;
const SPRITE_MIN_SCALE: f32 = 0.001;
const PLAYER_WIDTH: f32 = 0.18;
const REMOTE_KART_SIZE: f32 = 600.0;
const ROCK_SIZE: f32 = 800.0;
const CAR_WIDTH: f32 = 750.0;
const PUDDLE_SIZE: (f32, f32) = (1200.0, 400.0);
const FLAG_POLE: Color = Color::hex(0x555555);
const FLAG_CLOTH: Color = Color::hex(0xFFD700);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("render surface is {width}x{height}; nothing to draw into")]
    MissingSurface { width: usize, height: usize },
    #[error("a keyboard adapter is already bound to this engine")]
    AdapterAlreadyBound,
    #[error("engine has been destroyed")]
    TornDown,
}

/// Time source for race timing and send throttling.
pub trait Clock {
    /// Time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

#[derive(Clone, Debug)]
pub struct RaceOptions {
    pub character_id: String,
    pub local_player_id: String,
    pub player_name: String,
    /// Multiplayer room; solo when absent.
    pub session_id: Option<String>,
    pub difficulty: Difficulty,
    pub map_id: String,
    /// Fixes the track coin flip and hazard layout.
    pub seed: Option<u64>,
}

impl Default for RaceOptions {
    fn default() -> Self {
        Self {
            character_id: CHARACTERS[0].id.to_string(),
            local_player_id: "player".to_string(),
            player_name: "Player".to_string(),
            session_id: None,
            difficulty: Difficulty::Easy,
            map_id: "sawit-plants".to_string(),
            seed: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FinishReport {
    /// Seconds from race start.
    pub time: f32,
}

pub type FinishCallback = Box<dyn FnMut(FinishReport)>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaceState {
    Initializing,
    Running,
    Finished,
}

/// A sprite queued during the segment walk, drawn back to front afterwards.
struct QueuedSprite {
    id: AssetId,
    dest: Rect,
    clip: f32,
}

/// Where the player kart landed on screen.
struct KartPlacement {
    y: f32,
    height: f32,
}

pub struct RaceEngine {
    options: RaceOptions,
    config: RaceConfig,
    theme: &'static MapTheme,
    kart: usize,
    track: Track,
    hazards: ObstacleField,
    state: RaceState,
    torn_down: bool,

    position: f32,
    player_x: f32,
    speed: f32,
    nos: f32,
    nos_locked: bool,
    boosting: bool,
    was_on_puddle: bool,
    input_lock: f32,
    impact_timer: f32,
    camera_depth: f32,
    lean: f32,

    input: InputHub,
    transport: Option<Box<dyn Transport>>,
    remotes: Rc<RefCell<HashMap<String, RemoteSnapshot>>>,
    rankings: Rc<RefCell<Vec<LiveRanking>>>,
    clock: Box<dyn Clock>,
    start_time: Duration,
    last_frame: Option<Duration>,
    last_send: Option<Duration>,
    finish_time: Option<f32>,
    on_finish: Option<FinishCallback>,
    assets: AssetRegistry,
    jitter: Lcg,
}

impl RaceEngine {
    pub fn new(
        viewport: Viewport,
        options: RaceOptions,
        on_finish: Option<FinishCallback>,
        transport: Option<Box<dyn Transport>>,
        clock: Box<dyn Clock>,
        config: RaceConfig,
    ) -> Result<Self, EngineError> {
        if viewport.is_empty() {
            return Err(EngineError::MissingSurface {
                width: viewport.width,
                height: viewport.height,
            });
        }

        let theme = map_theme(&options.map_id);
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let track = Track::generate(options.difficulty, &theme.palette, &mut rng);
        let mut hazards = ObstacleField::new(track.length());
        hazards.populate(track.length(), options.difficulty, &mut rng);

        let mut engine = Self {
            kart: character_index(&options.character_id),
            theme,
            track,
            hazards,
            state: RaceState::Initializing,
            torn_down: false,
            position: 0.0,
            player_x: 0.0,
            speed: 0.0,
            nos: NOS_MAX,
            nos_locked: false,
            boosting: false,
            was_on_puddle: false,
            input_lock: 0.0,
            impact_timer: 0.0,
            camera_depth: config.camera.base_depth,
            lean: 0.0,
            input: InputHub::default(),
            transport,
            remotes: Rc::default(),
            rankings: Rc::default(),
            clock,
            start_time: Duration::ZERO,
            last_frame: None,
            last_send: None,
            finish_time: None,
            on_finish,
            assets: AssetRegistry::empty(),
            jitter: Lcg::new(options.seed.unwrap_or(0x5eed)),
            options,
            config,
        };
        engine.join_session();
        tracing::info!(
            "Race ready: {} on {}, {} segments",
            engine.options.difficulty,
            engine.theme.name,
            engine.track.segment_count()
        );
        Ok(engine)
    }

    fn join_session(&mut self) {
        let (Some(session), Some(transport)) = (self.options.session_id.as_deref(), self.transport.as_mut())
        else {
            return;
        };
        let identity = PlayerIdentity {
            id: self.options.local_player_id.clone(),
            name: self.options.player_name.clone(),
            character_id: self.options.character_id.clone(),
        };
        if let Err(e) = transport.join(session, &identity) {
            tracing::warn!("Could not join session {}: {}", session, e);
        }

        let remotes = Rc::clone(&self.remotes);
        let local_id = self.options.local_player_id.clone();
        transport.on(
            RACE_UPDATE,
            Box::new(move |payload: &Value| match serde_json::from_value::<RemoteSnapshot>(payload.clone()) {
                Ok(snapshot) if snapshot.id == local_id => {}
                Ok(snapshot) => {
                    remotes.borrow_mut().insert(snapshot.id.clone(), snapshot);
                }
                Err(e) => tracing::debug!("Dropping malformed {}: {}", RACE_UPDATE, e),
            }),
        );

        let rankings = Rc::clone(&self.rankings);
        transport.on(
            LIVE_RANKINGS,
            Box::new(move |payload: &Value| match serde_json::from_value::<Vec<LiveRanking>>(payload.clone()) {
                Ok(list) => *rankings.borrow_mut() = list,
                Err(e) => tracing::debug!("Dropping malformed {}: {}", LIVE_RANKINGS, e),
            }),
        );
    }

    /// Starts the race clock. Later calls are no-ops.
    pub fn start(&mut self) {
        if self.torn_down || self.state != RaceState::Initializing {
            return;
        }
        self.state = RaceState::Running;
        self.start_time = self.clock.now();
        tracing::info!("Race started");
    }

    pub fn bind_keyboard(&self) -> Result<KeyboardAdapter, EngineError> {
        if self.torn_down {
            return Err(EngineError::TornDown);
        }
        self.input.bind()
    }

    pub fn set_directional_input(&mut self, input: DirectionalInput) {
        self.input.set_touch(input);
    }

    /// Switches palette and sky; physics state is untouched.
    pub fn load_track(&mut self, map_id: &str) {
        self.theme = map_theme(map_id);
        self.track.repaint(&self.theme.palette);
        self.options.map_id = self.theme.id.to_string();
        tracing::info!("Switched to map {}", self.theme.name);
    }

    /// Replaces the track and clears every hazard.
    pub fn set_track(&mut self, track: Track) {
        self.hazards = ObstacleField::new(track.length());
        self.track = track;
        self.position = self.position.min(self.track.length());
    }

    pub fn set_hazards(&mut self, hazards: ObstacleField) {
        self.hazards = hazards;
    }

    pub fn set_assets(&mut self, assets: AssetRegistry) {
        self.assets = assets;
    }

    pub fn assets_mut(&mut self) -> &mut AssetRegistry {
        &mut self.assets
    }

    /// Records another racer's position; the latest report wins.
    pub fn update_opponent(&mut self, snapshot: RemoteSnapshot) {
        if snapshot.id == self.options.local_player_id {
            return;
        }
        self.remotes.borrow_mut().insert(snapshot.id.clone(), snapshot);
    }

    pub fn remote_players(&self) -> Vec<RemoteSnapshot> {
        let mut players: Vec<RemoteSnapshot> = self.remotes.borrow().values().cloned().collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        players
    }

    pub fn rankings(&self) -> Vec<LiveRanking> {
        self.rankings.borrow().clone()
    }

    pub fn local_rank(&self) -> Option<usize> {
        self.rankings
            .borrow()
            .iter()
            .find(|entry| entry.id == self.options.local_player_id)
            .map(|entry| entry.rank)
    }

    /// The result record for a finished race.
    pub fn finish_submission(&self, score: u32) -> Option<FinishSubmission> {
        let time = self.finish_time?;
        Some(FinishSubmission {
            room_id: self.options.session_id.clone(),
            player: PlayerIdentity {
                id: self.options.local_player_id.clone(),
                name: self.options.player_name.clone(),
                character_id: self.options.character_id.clone(),
            },
            score,
            time,
        })
    }

    /// Sends the finish record over the transport, if there is one.
    pub fn report_finish(&mut self, score: u32) -> Option<FinishSubmission> {
        let submission = self.finish_submission(score)?;
        if let Some(transport) = self.transport.as_mut() {
            let sent = serde_json::to_value(&submission)
                .map_err(Into::into)
                .and_then(|payload| transport.send(PLAYER_FINISHED, payload));
            if let Err(e) = sent {
                tracing::warn!("Could not report finish: {}", e);
            }
        }
        Some(submission)
    }

    pub fn state(&self) -> RaceState {
        self.state
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn player_x(&self) -> f32 {
        self.player_x
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn nos(&self) -> f32 {
        self.nos
    }

    pub fn nos_locked(&self) -> bool {
        self.nos_locked
    }

    pub fn is_boosting(&self) -> bool {
        self.boosting
    }

    pub fn camera_depth(&self) -> f32 {
        self.camera_depth
    }

    pub fn track(&self) -> &Track {
        &self.track
    }

    pub fn hazards(&self) -> &ObstacleField {
        &self.hazards
    }

    pub fn finish_time(&self) -> Option<f32> {
        self.finish_time
    }

    pub fn options(&self) -> &RaceOptions {
        &self.options
    }

    fn elapsed(&self) -> f32 {
        self.clock.now().saturating_sub(self.start_time).as_secs_f32()
    }

    fn pump_network(&mut self) {
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.pump() {
                tracing::warn!("Transport receive failed: {}", e);
            }
        }
    }

    /// One simulation step of `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.pump_network();
        if self.torn_down || self.state == RaceState::Finished {
            return;
        }
        if self.state == RaceState::Initializing {
            self.start();
        }

        let physics = self.config.physics.clone();
        let camera = self.config.camera.clone();
        let input = self.input.current();
        self.input_lock = (self.input_lock - dt).max(0.0);
        let locked = self.input_lock > 0.0;

        if input.boost && self.nos > 0.0 && !self.nos_locked {
            self.boosting = true;
            self.nos = (self.nos - physics.nos_drain * dt).max(0.0);
            if self.nos <= 0.0 {
                self.nos_locked = true;
                tracing::debug!("Boost drained, locked until {}", physics.nos_unlock);
            }
        } else {
            self.boosting = false;
            self.nos = (self.nos + physics.nos_regen * dt).min(NOS_MAX);
            if self.nos_locked && self.nos >= physics.nos_unlock {
                self.nos_locked = false;
            }
        }
        let max_speed = if self.boosting {
            physics.max_speed * physics.boost_factor
        } else {
            physics.max_speed
        };

        let target_depth = if self.speed > camera.zoom_threshold || self.boosting {
            camera.zoom_depth
        } else {
            camera.base_depth
        };
        self.camera_depth = ease_out(self.camera_depth, target_depth, (camera.depth_ease_rate * dt).min(1.0));

        let on_puddle = self.hazards.on_puddle(self.position, self.player_x);
        if on_puddle && !self.was_on_puddle {
            self.speed = (self.speed - physics.puddle_penalty).max(0.0);
        }
        self.was_on_puddle = on_puddle;

        if self.speed < 0.0 {
            // recoil from a rear-end bleeds off at the braking rate
            self.speed = (self.speed + physics.max_speed * dt).min(0.0);
        } else {
            let drag = if on_puddle { physics.puddle_drag } else { 1.0 };
            let accel_penalty = if on_puddle { physics.puddle_accel } else { 1.0 };
            if input.up && !locked {
                self.speed = (self.speed + max_speed / 5.0 * accel_penalty * dt) * drag;
            } else if input.down && !locked {
                self.speed -= max_speed * dt;
            } else {
                self.speed = (self.speed - max_speed / 5.0 * dt) * drag;
            }
            self.speed = self.speed.clamp(0.0, max_speed);
        }

        if self.speed != 0.0 || input.up || input.down {
            let turn = dt * (self.speed / max_speed).abs().max(physics.min_turn);
            if input.left {
                self.player_x -= turn;
            } else if input.right {
                self.player_x += turn;
            }
        }

        let lean_target = if input.left {
            -camera.lean_angle
        } else if input.right {
            camera.lean_angle
        } else {
            0.0
        };
        self.lean = lerp(self.lean, lean_target, camera.lean_lerp);

        if self.player_x.abs() > 1.0 {
            self.speed *= physics.off_road_decay;
        }

        let length = self.track.length();
        let outcome = self.hazards.tick(dt, self.position, self.player_x, self.speed);
        if outcome.hit {
            if let Some(speed) = outcome.speed_override {
                self.speed = speed;
            }
            if let Some(z) = outcome.force_position {
                self.position = (self.position + ring_delta(z, self.position, length)).clamp(0.0, length);
            }
            self.input_lock = physics.input_lock;
        }
        if outcome.impact {
            self.impact_timer = physics.impact_duration;
        } else {
            self.impact_timer = (self.impact_timer - dt).max(0.0);
        }

        self.position = (self.position + self.speed * dt).max(0.0);
        if self.position >= length {
            self.finish(length);
            return;
        }

        self.sync_position();
    }

    fn finish(&mut self, length: f32) {
        self.position = length;
        self.speed = 0.0;
        self.boosting = false;
        self.state = RaceState::Finished;
        let time = self.elapsed();
        self.finish_time = Some(time);
        tracing::info!("Finished in {:.2}s", time);
        if let Some(callback) = self.on_finish.as_mut() {
            callback(FinishReport { time });
        }
    }

    fn sync_position(&mut self) {
        if self.state != RaceState::Running {
            return;
        }
        let Some(room_id) = self.options.session_id.clone() else {
            return;
        };
        let now = self.clock.now();
        if let Some(last) = self.last_send {
            if now.saturating_sub(last) <= self.config.network.send_interval() {
                return;
            }
        }
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        self.last_send = Some(now);

        let broadcast = PositionBroadcast {
            room_id,
            state: RemoteSnapshot {
                id: self.options.local_player_id.clone(),
                x: self.player_x,
                z: self.position,
                character_id: self.options.character_id.clone(),
            },
        };
        let sent = serde_json::to_value(&broadcast)
            .map_err(Into::into)
            .and_then(|payload| transport.send(RACE_UPDATE, payload));
        if let Err(e) = sent {
            tracing::warn!("Position update failed: {}", e);
        }
    }

    /// Advances by the clamped time since the previous frame, then draws.
    pub fn frame(&mut self, surface: &mut dyn Surface) {
        let now = self.clock.now();
        let dt = match self.last_frame {
            Some(last) => now.saturating_sub(last).min(self.config.network.max_frame()),
            None => Duration::ZERO,
        };
        self.last_frame = Some(now);
        self.assets.poll();
        self.update(dt.as_secs_f32());
        self.render(surface);
    }

    pub fn render(&mut self, surface: &mut dyn Surface) {
        if self.torn_down {
            return;
        }
        let viewport = Viewport::new(surface.width(), surface.height());
        if viewport.is_empty() {
            return;
        }
        let (w, h) = (viewport.width as f32, viewport.height as f32);

        surface.set_transform(Transform2::IDENTITY);
        surface.clear(Color::BLACK);

        let (shake_x, shake_y) = self.shake();
        let world = Transform2::rotate_about(self.lean * 0.5, w / 2.0, h / 2.0, shake_x + self.lean * w, shake_y);
        surface.set_transform(world);

        self.draw_background(surface, w, h);
        let queued = self.draw_road(surface, viewport);
        for item in queued.iter().rev() {
            if let Some(sprite) = self.assets.get(item.id) {
                surface.draw_sprite(sprite, item.dest, item.clip, Blit::default());
            }
        }

        let bounce = self.bounce(h);
        if let Some(kart) = self.draw_player(surface, world, w, h, bounce) {
            self.draw_boost_flame(surface, w, &kart);
        }
        self.draw_impact_lines(surface, w, h);

        surface.set_transform(Transform2::IDENTITY);
        let rankings = self.rankings.borrow();
        let remote_positions: Vec<f32> = self.remotes.borrow().values().map(|r| r.z).collect();
        hud::draw(
            surface,
            &HudSnapshot {
                speed: self.speed,
                max_speed: self.config.physics.max_speed,
                nos: self.nos,
                nos_locked: self.nos_locked,
                boosting: self.boosting,
                rankings: &rankings,
                local_id: &self.options.local_player_id,
                map: self.track.map_data(),
                position: self.position,
                remote_positions,
            },
        );
    }

    fn shake(&mut self) -> (f32, f32) {
        let camera = &self.config.camera;
        if self.state == RaceState::Finished || self.speed <= camera.shake_threshold {
            return (0.0, 0.0);
        }
        let intensity = camera.shake_intensity;
        (
            (self.jitter.next_f32() - 0.5) * intensity,
            (self.jitter.next_f32() - 0.5) * intensity,
        )
    }

    fn bounce(&mut self, h: f32) -> f32 {
        let max_speed = self.config.physics.max_speed;
        if self.speed <= 0.0 || max_speed <= 0.0 {
            return 0.0;
        }
        let a = self.jitter.next_f32();
        let b = self.jitter.next_f32();
        1.5 * a * b * (self.speed / max_speed) * (h / 480.0) * 10.0
    }

    /// Oversized sky and ground so the rotated world never shows a gap.
    fn draw_background(&self, surface: &mut dyn Surface, w: f32, h: f32) {
        let palette = &self.theme.palette;
        let sky = if self.theme.sky_image {
            self.assets.get(AssetId::Sky)
        } else {
            None
        };
        match sky {
            Some(sprite) => {
                surface.draw_sprite(sprite, Rect::new(-w / 2.0, -h / 2.0, w * 2.0, h * 2.0), f32::INFINITY, Blit::default());
            }
            None => {
                let band = h * 3.0 / SKY_BANDS as f32;
                for i in 0..SKY_BANDS {
                    let t = i as f32 / (SKY_BANDS - 1) as f32;
                    let color = Color::lerp(palette.sky_top, palette.sky_bottom, t);
                    surface.fill_rect(Rect::new(-w, -h + i as f32 * band, w * 3.0, band + 1.0), color);
                }
            }
        }
        surface.fill_rect(Rect::new(-w, h / 2.0, w * 3.0, h * 2.0), palette.grass_light);
    }

    /// Walks the visible segments front to back, drawing road and flags and
    /// queueing sprites with their segment clip.
    fn draw_road(&mut self, surface: &mut dyn Surface, viewport: Viewport) -> Vec<QueuedSprite> {
        let mut queued = Vec::new();
        let count = self.track.segment_count();
        if count == 0 {
            return queued;
        }
        let (w, h) = (viewport.width as f32, viewport.height as f32);
        let length = self.track.length();
        let base_index = self.track.segment_index(self.position);
        let finish_index = self.track.finish_index();
        let base = &self.track.segments()[base_index];
        let base_percent = wrap(self.position, SEGMENT_LENGTH) / SEGMENT_LENGTH;
        let camera_y = CAMERA_HEIGHT + lerp(base.p1.world.y, base.p2.world.y, base_percent);
        let camera_x = self.player_x * ROAD_WIDTH;
        let mut dx = -(base.curve * base_percent);
        let mut x = 0.0;
        let mut maxy = h;

        for n in 0..DRAW_DISTANCE.min(count) {
            let index = (base_index + n) % count;
            let camera_z = if index < base_index { self.position - length } else { self.position };
            let near_camera = Camera {
                x: camera_x - x,
                y: camera_y,
                z: camera_z,
                depth: self.camera_depth,
            };
            let far_camera = Camera {
                x: camera_x - x - dx,
                ..near_camera
            };

            let segment = &mut self.track.segments_mut()[index];
            segment.clip = maxy;
            project(&mut segment.p1, &near_camera, viewport, ROAD_WIDTH);
            project(&mut segment.p2, &far_camera, viewport, ROAD_WIDTH);
            x += dx;
            dx += segment.curve;

            let mut draw = true;
            let under_camera = segment.p1.camera.z <= CAMERA_DEPTH;
            if under_camera {
                if segment.p2.camera.z > CAMERA_DEPTH {
                    segment.p1.screen.x = w / 2.0;
                    segment.p1.screen.y = h;
                    segment.p1.screen.w = w * 5.0;
                } else {
                    draw = false;
                }
            } else if segment.p2.screen.y >= maxy || segment.p2.screen.y >= segment.p1.screen.y {
                draw = false;
            }

            let segment = &self.track.segments()[index];
            if draw {
                let near = Edge::from(&segment.p1);
                let far = Edge::from(&segment.p2);
                let paint = SegmentPaint {
                    grass: segment.color.grass,
                    road: segment.color.road,
                    rumble: segment.color.rumble,
                    lane: segment.color.lane,
                };
                if index == 0 || index == finish_index {
                    draw_checkered_segment(surface, near, far, &paint);
                } else {
                    draw_segment(surface, LANES, near, far, &paint);
                }
                if segment.checkpoint {
                    draw_checkpoint_flags(surface, far);
                }
            }

            // the stretched near edge would blow sprites up past the screen
            if !under_camera {
                self.queue_segment_sprites(&mut queued, index, w);
            }

            if draw {
                maxy = self.track.segments()[index].p2.screen.y;
            }
        }
        queued
    }

    fn queue_segment_sprites(&self, queued: &mut Vec<QueuedSprite>, index: usize, w: f32) {
        let segment = &self.track.segments()[index];
        let p1 = segment.p1.screen;
        let scale = p1.w / ROAD_WIDTH;
        if scale <= SPRITE_MIN_SCALE {
            return;
        }
        let clip = segment.clip;
        let count = self.track.segment_count();
        let mut push = |id: AssetId, dest: Rect| {
            if dest.y < clip && dest.x < w * 2.0 && dest.x + dest.w > -w {
                queued.push(QueuedSprite { id, dest, clip });
            }
        };
        let aspect = |id: AssetId| self.assets.get(id).map(|sprite| sprite.aspect());

        for decoration in &segment.sprites {
            let id = scenery_asset(decoration.kind);
            let Some(ratio) = aspect(id) else { continue };
            let sprite_h = decoration.height * scale;
            let sprite_w = sprite_h * ratio;
            let sx = p1.x + decoration.offset * p1.w + decoration.anchor * sprite_w;
            let sy = p1.y - sprite_h + decoration.sink * sprite_h;
            push(id, Rect::new(sx, sy, sprite_w, sprite_h));
        }

        if self.assets.is_ready(AssetId::Rock) {
            for rock in self.hazards.rocks_in(index, count) {
                let size = ROCK_SIZE * scale;
                let sx = p1.x + rock.x * p1.w;
                push(AssetId::Rock, Rect::new(sx - size / 2.0, p1.y - size, size, size));
            }
        }

        if self.assets.is_ready(AssetId::Puddle) {
            for puddle in self.hazards.puddles_in(index, count) {
                let (pw, ph) = (PUDDLE_SIZE.0 * scale, PUDDLE_SIZE.1 * scale);
                let sx = p1.x + puddle.x * p1.w;
                push(AssetId::Puddle, Rect::new(sx - pw / 2.0, p1.y - ph / 2.0, pw, ph));
            }
        }

        if let Some(car_aspect) = aspect(AssetId::TrafficCar) {
            for car in self.hazards.cars_in(index, count) {
                let cw = CAR_WIDTH * scale;
                let ch = cw / car_aspect;
                let sx = p1.x + car.x * p1.w;
                push(AssetId::TrafficCar, Rect::new(sx - cw / 2.0, p1.y - ch, cw, ch));
            }
        }

        let length = self.track.length();
        for remote in self.remotes.borrow().values() {
            if self.track.segment_index(wrap(remote.z, length)) != index {
                continue;
            }
            let id = AssetId::Kart(character_index(&remote.character_id));
            let Some(kart_aspect) = aspect(id) else { continue };
            let kw = REMOTE_KART_SIZE * scale;
            let kh = kw / kart_aspect;
            let sx = p1.x + remote.x * p1.w;
            push(id, Rect::new(sx - kw / 2.0, p1.y - kh, kw, kh));
        }
    }

    fn draw_player(
        &self,
        surface: &mut dyn Surface,
        world: Transform2,
        w: f32,
        h: f32,
        bounce: f32,
    ) -> Option<KartPlacement> {
        let input = self.input.current();
        let base = AssetId::Kart(self.kart);
        let lean_art = CHARACTERS.get(self.kart).is_some_and(|c| c.lean_sprites);
        let id = match (lean_art, input.left, input.right) {
            (true, true, _) => AssetId::KartLeft,
            (true, false, true) => AssetId::KartRight,
            _ => base,
        };
        let sprite = self.assets.get(id).or_else(|| self.assets.get(base))?;

        let sprite_w = w * PLAYER_WIDTH;
        let sprite_h = sprite_w / sprite.aspect();
        let y = h - sprite_h - 20.0 - bounce;
        let max_speed = self.config.physics.max_speed;
        let steer = if input.left {
            -0.1
        } else if input.right {
            0.1
        } else {
            0.0
        };
        let tilt = if max_speed > 0.0 { steer * self.speed / max_speed } else { 0.0 };

        surface.set_transform(Transform2::rotate_about(tilt, w / 2.0, y, 0.0, 0.0).then(&world));
        surface.draw_sprite(sprite, Rect::new(w / 2.0 - sprite_w / 2.0, y, sprite_w, sprite_h), f32::INFINITY, Blit::default());
        surface.set_transform(world);
        Some(KartPlacement { y, height: sprite_h })
    }

    fn draw_boost_flame(&mut self, surface: &mut dyn Surface, w: f32, kart: &KartPlacement) {
        if !self.boosting {
            return;
        }
        let flicker = self.jitter.next_f32() * 0.2 + 0.8;
        let Some(flame) = self.assets.get(AssetId::BoostFlame) else {
            return;
        };
        let (fw, fh) = (40.0 * flicker, 60.0 * flicker);
        let blit = Blit {
            additive: true,
            ..Blit::default()
        };
        surface.draw_sprite(flame, Rect::new(w / 2.0 - fw / 2.0, kart.y + kart.height - 10.0, fw, fh), f32::INFINITY, blit);
    }

    fn draw_impact_lines(&self, surface: &mut dyn Surface, w: f32, h: f32) {
        let duration = self.config.physics.impact_duration;
        if self.impact_timer <= 0.0 || duration <= 0.0 {
            return;
        }
        let Some(lines) = self.assets.get(AssetId::ImpactLines) else {
            return;
        };
        let t = self.impact_timer / duration;
        let opacity = (t * 2.0).min((1.0 - t) * 2.0).min(0.8);
        if opacity <= 0.0 {
            return;
        }
        let third = w / 3.0;
        let blit = Blit {
            opacity,
            ..Blit::default()
        };
        surface.draw_sprite(lines, Rect::new(0.0, 0.0, third, h), f32::INFINITY, blit);
        surface.draw_sprite(
            lines,
            Rect::new(w - third, 0.0, third, h),
            f32::INFINITY,
            Blit {
                flip_x: true,
                ..blit
            },
        );
    }

    /// Stops the race and lets go of input, assets and the session.
    /// Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.input.release();
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.leave() {
                tracing::warn!("Leaving session failed: {}", e);
            }
        }
        self.assets.clear();
        self.remotes.borrow_mut().clear();
        self.rankings.borrow_mut().clear();
        self.on_finish = None;
        tracing::info!("Race engine torn down");
    }
}

impl Drop for RaceEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn scenery_asset(kind: Scenery) -> AssetId {
    match kind {
        Scenery::BushDry => AssetId::BushDry,
        Scenery::BushGreen => AssetId::BushGreen,
        Scenery::Tree => AssetId::Tree,
        Scenery::PalmTree => AssetId::PalmTree,
        Scenery::Billboard1 => AssetId::Billboard1,
        Scenery::Billboard2 => AssetId::Billboard2,
        Scenery::House => AssetId::House,
        Scenery::Well => AssetId::Well,
    }
}

/// A pennant on a pole at each road edge of the far line.
fn draw_checkpoint_flags(surface: &mut dyn Surface, far: Edge) {
    let scale = far.w / ROAD_WIDTH;
    if scale <= 0.0 {
        return;
    }
    let (pole_w, pole_h) = (5.0 * scale, 100.0 * scale);
    let top = far.y - pole_h;

    let right = far.x + far.w;
    surface.fill_rect(Rect::new(right, top, pole_w, pole_h), FLAG_POLE);
    surface.fill_polygon(
        &[(right, top), (right + 60.0 * scale, far.y - 80.0 * scale), (right, far.y - 60.0 * scale)],
        FLAG_CLOTH,
    );

    let left = far.x - far.w - pole_w;
    surface.fill_rect(Rect::new(left, top, pole_w, pole_h), FLAG_POLE);
    let inner = left + pole_w;
    surface.fill_polygon(
        &[(inner, top), (inner - 60.0 * scale, far.y - 80.0 * scale), (inner, far.y - 60.0 * scale)],
        FLAG_CLOTH,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{fallback_sprite, Sprite};
    use crate::input::InputState;
    use crate::net::LoopbackHub;
    use crate::obstacles::{Puddle, Rock, TrafficCar};
    use crate::surface::recording::{DrawCall, RecordingSurface};
    use crate::theme::MAPS;
    use crate::track::Section;

    const DT: f32 = 1.0 / 60.0;

    fn options() -> RaceOptions {
        RaceOptions {
            seed: Some(11),
            ..RaceOptions::default()
        }
    }

    fn engine_with(clock: &ManualClock, options: RaceOptions, transport: Option<Box<dyn Transport>>) -> RaceEngine {
        RaceEngine::new(
            Viewport::new(320, 200),
            options,
            None,
            transport,
            Box::new(clock.clone()),
            RaceConfig::default(),
        )
        .unwrap()
    }

    /// Engine on the seeded easy track with every hazard removed.
    fn quiet_engine(clock: &ManualClock) -> RaceEngine {
        let mut engine = engine_with(clock, options(), None);
        let length = engine.track().length();
        engine.set_hazards(ObstacleField::new(length));
        engine
    }

    fn hold(adapter: &KeyboardAdapter, keys: InputState) {
        adapter.set(keys);
    }

    #[test]
    fn test_zero_viewport_is_rejected() {
        let result = RaceEngine::new(
            Viewport::new(0, 200),
            options(),
            None,
            None,
            Box::new(ManualClock::default()),
            RaceConfig::default(),
        );
        assert!(matches!(result, Err(EngineError::MissingSurface { width: 0, height: 200 })));
    }

    #[test]
    fn test_idle_player_stays_put() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        for _ in 0..300 {
            engine.update(DT);
        }
        assert_eq!(engine.position(), 0.0);
        assert_eq!(engine.speed(), 0.0);
        assert_eq!(engine.state(), RaceState::Running);
    }

    #[test]
    fn test_throttle_reaches_but_never_exceeds_max_speed() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let keys = engine.bind_keyboard().unwrap();
        hold(&keys, InputState { up: true, ..InputState::default() });
        let max = RaceConfig::default().physics.max_speed;
        for _ in 0..300 {
            engine.update(DT);
            assert!(engine.speed() <= max);
        }
        assert!(engine.speed() > max * 0.99);
        assert!(engine.position() > 0.0);
    }

    #[test]
    fn test_boost_locks_when_drained_and_unlocks_at_threshold() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let keys = engine.bind_keyboard().unwrap();
        hold(&keys, InputState { boost: true, ..InputState::default() });

        // drains 15 per second from 100
        for _ in 0..7 {
            engine.update(1.0);
        }
        assert_eq!(engine.nos(), 0.0);
        assert!(engine.nos_locked());

        for expected in [5.0, 10.0, 15.0] {
            engine.update(1.0);
            assert!(!engine.is_boosting());
            assert!(engine.nos_locked());
            assert_eq!(engine.nos(), expected);
        }
        engine.update(1.0);
        assert_eq!(engine.nos(), 20.0);
        assert!(!engine.nos_locked());
        engine.update(1.0);
        assert!(engine.is_boosting());
    }

    #[test]
    fn test_boost_raises_the_speed_cap() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let keys = engine.bind_keyboard().unwrap();
        hold(&keys, InputState { up: true, boost: true, ..InputState::default() });
        let max = RaceConfig::default().physics.max_speed;
        for _ in 0..360 {
            engine.update(DT);
        }
        assert!(engine.speed() > max);
        assert!(engine.camera_depth() < CAMERA_DEPTH);
    }

    #[test]
    fn test_puddle_entry_cuts_speed_once() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let length = engine.track().length();
        engine.set_hazards(ObstacleField::with_hazards(
            length,
            Vec::new(),
            Vec::new(),
            vec![Puddle { z: 5000.0, x: 0.0 }],
        ));
        let keys = engine.bind_keyboard().unwrap();
        hold(&keys, InputState { down: true, ..InputState::default() });

        engine.position = 5000.0;
        engine.speed = 8000.0;
        engine.update(0.0);
        assert_eq!(engine.speed(), 5000.0);
        engine.update(0.0);
        assert_eq!(engine.speed(), 5000.0);
    }

    #[test]
    fn test_puddle_entry_floors_speed_at_zero() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let length = engine.track().length();
        engine.set_hazards(ObstacleField::with_hazards(
            length,
            Vec::new(),
            Vec::new(),
            vec![Puddle { z: 5000.0, x: 0.0 }],
        ));
        let keys = engine.bind_keyboard().unwrap();
        hold(&keys, InputState { down: true, ..InputState::default() });
        engine.position = 5000.0;
        engine.speed = 2000.0;
        engine.update(0.0);
        assert_eq!(engine.speed(), 0.0);
    }

    #[test]
    fn test_puddle_entry_ends_recoil() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let length = engine.track().length();
        engine.set_hazards(ObstacleField::with_hazards(
            length,
            Vec::new(),
            Vec::new(),
            vec![Puddle { z: 5000.0, x: 0.0 }],
        ));
        engine.position = 5000.0;
        engine.speed = -2000.0;
        engine.update(0.0);
        assert_eq!(engine.speed(), 0.0);
    }

    fn engine_behind_car(clock: &ManualClock, player_z: f32, car: TrafficCar) -> (RaceEngine, KeyboardAdapter) {
        let mut engine = quiet_engine(clock);
        let length = engine.track().length();
        engine.set_hazards(ObstacleField::with_hazards(length, Vec::new(), vec![car], Vec::new()));
        let keys = engine.bind_keyboard().unwrap();
        hold(&keys, InputState { up: true, ..InputState::default() });
        engine.position = player_z;
        engine.speed = 8000.0;
        (engine, keys)
    }

    #[test]
    fn test_rear_ending_a_car_bounces_the_kart_back() {
        let clock = ManualClock::default();
        let (mut engine, _keys) = engine_behind_car(&clock, 5000.0, TrafficCar::new(5100.0, 0.0, 3000.0));
        engine.update(0.0);
        assert_eq!(engine.speed(), -2000.0);
        assert_eq!(engine.position(), 4850.0);
        assert_eq!(engine.input_lock, engine.config.physics.input_lock);
        assert_eq!(engine.impact_timer, engine.config.physics.impact_duration);

        // recoil bleeds off at the braking rate and never turns into reverse
        engine.update(0.1);
        assert!((engine.speed() + 1000.0).abs() < 1e-2);
        engine.update(0.1);
        assert_eq!(engine.speed(), 0.0);
        assert!(engine.position() < 4850.0);
    }

    #[test]
    fn test_car_hit_is_not_repeated_during_knockback() {
        let clock = ManualClock::default();
        let (mut engine, _keys) = engine_behind_car(&clock, 5000.0, TrafficCar::new(5100.0, 0.0, 3000.0));
        engine.update(0.0);
        assert_eq!(engine.speed(), -2000.0);

        // still overlapping the car while the knockback runs
        engine.position = 5000.0;
        engine.speed = 6000.0;
        engine.update(0.1);
        assert!(engine.speed() > 0.0);
        assert!(engine.position() > 5000.0);
        assert!(engine.impact_timer < engine.config.physics.impact_duration);
    }

    #[test]
    fn test_car_hit_across_the_wrap_pulls_kart_back_the_short_way() {
        let clock = ManualClock::default();
        let (mut engine, _keys) = engine_behind_car(&clock, 0.0, TrafficCar::new(50.0, 0.0, 3000.0));
        let length = engine.track().length();
        engine.position = length - 50.0;
        engine.update(0.0);
        assert_eq!(engine.state(), RaceState::Running);
        assert_eq!(engine.speed(), -2000.0);
        assert!((engine.position() - (length - 200.0)).abs() < 1.0);
    }

    #[test]
    fn test_rock_hit_stops_and_locks_throttle() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let length = engine.track().length();
        engine.set_hazards(ObstacleField::with_hazards(
            length,
            vec![Rock { z: 5100.0, x: 0.0 }],
            Vec::new(),
            Vec::new(),
        ));
        let keys = engine.bind_keyboard().unwrap();
        hold(&keys, InputState { up: true, ..InputState::default() });
        engine.position = 5000.0;
        engine.speed = 6000.0;
        engine.update(DT);
        assert_eq!(engine.speed(), 0.0);

        // throttle is ignored while the lock runs
        engine.update(0.1);
        assert_eq!(engine.speed(), 0.0);
    }

    #[test]
    fn test_recoil_decays_to_rest() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let keys = engine.bind_keyboard().unwrap();
        hold(&keys, InputState { up: true, ..InputState::default() });
        engine.position = 5000.0;
        engine.speed = -2000.0;
        engine.update(0.1);
        assert_eq!(engine.speed(), -1000.0);
        assert!(engine.position() < 5000.0);
        engine.update(0.2);
        assert_eq!(engine.speed(), 0.0);
    }

    #[test]
    fn test_off_road_slows_the_kart() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        engine.player_x = 1.5;
        engine.speed = 4000.0;
        engine.update(0.0);
        assert!((engine.speed() - 4000.0 * 0.975).abs() < 1e-2);
    }

    #[test]
    fn test_finish_clamps_position_and_reports_once() {
        let clock = ManualClock::default();
        let reports = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reports);
        let mut engine = RaceEngine::new(
            Viewport::new(320, 200),
            options(),
            Some(Box::new(move |report: FinishReport| sink.borrow_mut().push(report.time))),
            None,
            Box::new(clock.clone()),
            RaceConfig::default(),
        )
        .unwrap();
        engine.set_track(Track::from_sections(Difficulty::Easy, &MAPS[0].palette, &[Section::straight(10)]));
        let length = engine.track().length();
        // 30 segments of straight plus the finish straight
        assert_eq!(length, 16000.0);

        engine.start();
        clock.advance(Duration::from_secs(2));
        engine.position = length - 10.0;
        engine.speed = 5000.0;
        engine.update(1.0);

        assert_eq!(engine.position(), length);
        assert_eq!(engine.speed(), 0.0);
        assert_eq!(engine.state(), RaceState::Finished);
        assert_eq!(*reports.borrow(), vec![2.0]);

        engine.update(1.0);
        assert_eq!(reports.borrow().len(), 1);
        let submission = engine.finish_submission(1200).unwrap();
        assert_eq!(submission.time, 2.0);
        assert_eq!(submission.score, 1200);
    }

    #[test]
    fn test_latest_opponent_report_wins() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let report = |z: f32| RemoteSnapshot {
            id: "rival".to_string(),
            x: 0.2,
            z,
            character_id: "luigi".to_string(),
        };
        engine.update_opponent(report(100.0));
        engine.update_opponent(report(50.0));
        let remotes = engine.remote_players();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].z, 50.0);

        engine.update_opponent(RemoteSnapshot {
            id: "player".to_string(),
            ..report(10.0)
        });
        assert_eq!(engine.remote_players().len(), 1);
    }

    #[test]
    fn test_session_relays_positions_both_ways() {
        let clock = ManualClock::default();
        let hub = LoopbackHub::new();
        let mut engine = engine_with(
            &clock,
            RaceOptions {
                session_id: Some("room".to_string()),
                ..options()
            },
            Some(Box::new(hub.connect())),
        );
        assert_eq!(hub.members("room"), 1);

        let mut peer = hub.connect();
        peer.join(
            "room",
            &PlayerIdentity {
                id: "rival".to_string(),
                name: "Rival".to_string(),
                character_id: "toad".to_string(),
            },
        )
        .unwrap();
        let broadcast = PositionBroadcast {
            room_id: "room".to_string(),
            state: RemoteSnapshot {
                id: "rival".to_string(),
                x: -0.3,
                z: 800.0,
                character_id: "toad".to_string(),
            },
        };
        peer.send(RACE_UPDATE, serde_json::to_value(&broadcast).unwrap()).unwrap();

        engine.update(DT);
        let remotes = engine.remote_players();
        assert_eq!(remotes.len(), 1);
        assert_eq!(remotes[0].z, 800.0);
        assert_eq!(engine.rankings()[0].id, "rival");

        // the engine's own update re-ranks once it is pumped
        engine.update(DT);
        assert_eq!(engine.local_rank(), Some(2));
    }

    #[test]
    fn test_position_updates_are_throttled() {
        let clock = ManualClock::default();
        let hub = LoopbackHub::new();
        let mut engine = engine_with(
            &clock,
            RaceOptions {
                session_id: Some("room".to_string()),
                ..options()
            },
            Some(Box::new(hub.connect())),
        );

        let received = Rc::new(Cell::new(0));
        let counter = Rc::clone(&received);
        let mut peer = hub.connect();
        peer.join(
            "room",
            &PlayerIdentity {
                id: "rival".to_string(),
                name: "Rival".to_string(),
                character_id: "toad".to_string(),
            },
        )
        .unwrap();
        peer.on(RACE_UPDATE, Box::new(move |_: &Value| counter.set(counter.get() + 1)));

        for _ in 0..100 {
            clock.advance(Duration::from_millis(10));
            engine.update(0.01);
        }
        peer.pump().unwrap();
        // first send at 10ms, then every 60ms: strictly more than 50ms apart
        assert_eq!(received.get(), 17);
    }

    #[test]
    fn test_solo_race_survives_without_transport() {
        let clock = ManualClock::default();
        let mut engine = engine_with(
            &clock,
            RaceOptions {
                session_id: Some("room".to_string()),
                ..options()
            },
            None,
        );
        engine.update(DT);
        assert_eq!(engine.state(), RaceState::Running);
    }

    #[test]
    fn test_frame_delta_is_clamped() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let mut surface = RecordingSurface::new(320, 200);
        engine.frame(&mut surface);
        engine.speed = 5000.0;
        clock.advance(Duration::from_secs(10));
        engine.frame(&mut surface);
        // one second of coasting: 5000 - 2000
        assert_eq!(engine.speed(), 3000.0);
        assert_eq!(engine.position(), 3000.0);
    }

    #[test]
    fn test_render_without_assets_draws_no_sprites() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        engine.position = engine.track().length() - 2000.0;
        let mut surface = RecordingSurface::new(320, 200);
        engine.render(&mut surface);

        assert!(surface.sprites().is_empty());
        assert!(surface.polygons_with(Color::WHITE) >= 5);
        assert!(surface.polygons_with(Color::BLACK) >= 5);
        let first_text = surface.calls.iter().find_map(|call| match call {
            DrawCall::Text(text) => Some(text.clone()),
            _ => None,
        });
        assert!(first_text.is_some_and(|text| text.starts_with("SPEED")));
    }

    #[test]
    fn test_rock_sprite_is_queued_with_its_clip() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let length = engine.track().length();
        engine.set_hazards(ObstacleField::with_hazards(
            length,
            vec![Rock { z: 2000.0, x: 0.0 }],
            Vec::new(),
            Vec::new(),
        ));
        let mut assets = AssetRegistry::empty();
        assets.insert(AssetId::Rock, fallback_sprite(AssetId::Rock).unwrap());
        engine.set_assets(assets);

        let mut surface = RecordingSurface::new(320, 200);
        engine.render(&mut surface);
        let sprites = surface.sprites();
        assert_eq!(sprites.len(), 1);
        let (dest, clip) = sprites[0];
        assert!(dest.y < clip);
        assert!((dest.x + dest.w / 2.0 - 160.0).abs() < 1.0);
    }

    #[test]
    fn test_rock_under_the_camera_is_not_drawn() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let length = engine.track().length();
        engine.set_hazards(ObstacleField::with_hazards(
            length,
            vec![Rock { z: 190.0, x: 0.0 }, Rock { z: 2000.0, x: 0.0 }],
            Vec::new(),
            Vec::new(),
        ));
        let mut assets = AssetRegistry::empty();
        assets.insert(AssetId::Rock, fallback_sprite(AssetId::Rock).unwrap());
        engine.set_assets(assets);

        let mut surface = RecordingSurface::new(320, 200);
        engine.render(&mut surface);
        let sprites = surface.sprites();
        assert_eq!(sprites.len(), 1);
        let (dest, _) = sprites[0];
        assert!(dest.w < 320.0 && dest.h < 200.0);
    }

    #[test]
    fn test_player_kart_is_drawn_at_the_bottom() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        let mut assets = AssetRegistry::empty();
        assets.insert(AssetId::Kart(0), Sprite::blank(30, 20));
        engine.set_assets(assets);
        let mut surface = RecordingSurface::new(320, 200);
        engine.render(&mut surface);
        let sprites = surface.sprites();
        assert_eq!(sprites.len(), 1);
        let (dest, _) = sprites[0];
        assert!((dest.bottom() - 180.0).abs() < 1e-3);
    }

    #[test]
    fn test_load_track_swaps_palette_only() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        engine.position = 3000.0;
        engine.speed = 1234.0;
        let geometry = engine.track().segments()[40].p2.world;
        engine.load_track("alien-land");
        assert_eq!(engine.options().map_id, "alien-land");
        assert_eq!(engine.track().segments()[40].p2.world, geometry);
        assert_eq!(engine.track().segments()[40].color.grass, MAPS[2].palette.grass_dark);
        assert_eq!(engine.position(), 3000.0);
        assert_eq!(engine.speed(), 1234.0);
    }

    #[test]
    fn test_touch_buttons_drive_the_kart() {
        let clock = ManualClock::default();
        let mut engine = quiet_engine(&clock);
        engine.set_directional_input(DirectionalInput {
            up: true,
            right: true,
            ..DirectionalInput::default()
        });
        for _ in 0..30 {
            engine.update(DT);
        }
        assert!(engine.speed() > 0.0);
        assert!(engine.player_x() > 0.0);
    }

    #[test]
    fn test_destroy_releases_everything() {
        let clock = ManualClock::default();
        let hub = LoopbackHub::new();
        let mut engine = engine_with(
            &clock,
            RaceOptions {
                session_id: Some("room".to_string()),
                ..options()
            },
            Some(Box::new(hub.connect())),
        );
        let keys = engine.bind_keyboard().unwrap();
        assert!(matches!(engine.bind_keyboard(), Err(EngineError::AdapterAlreadyBound)));

        engine.destroy();
        engine.destroy();
        assert!(engine.is_torn_down());
        assert_eq!(hub.members("room"), 0);
        assert!(matches!(engine.bind_keyboard(), Err(EngineError::TornDown)));

        keys.set(InputState { up: true, ..InputState::default() });
        let mut surface = RecordingSurface::new(320, 200);
        engine.render(&mut surface);
        assert!(surface.calls.is_empty());
    }

    #[test]
    fn test_dropping_engine_leaves_session() {
        let clock = ManualClock::default();
        let hub = LoopbackHub::new();
        {
            let _engine = engine_with(
                &clock,
                RaceOptions {
                    session_id: Some("room".to_string()),
                    ..options()
                },
                Some(Box::new(hub.connect())),
            );
            assert_eq!(hub.members("room"), 1);
        }
        assert_eq!(hub.members("room"), 0);
    }
}
