//! Rocks, traffic and puddles placed along the track.

use rand::Rng;

use crate::constants::SEGMENT_LENGTH;
use crate::math::ring_delta;
use crate::track::Difficulty;

/// Spawns stay clear of the first and last stretch of road.
const SPAWN_MARGIN: f32 = 1000.0;
/// Reference top speed traffic speeds are derived from.
const TRAFFIC_REFERENCE_SPEED: f32 = 12000.0;

const HIT_Z_MIN: f32 = -20.0;
const HIT_Z_MAX: f32 = 150.0;
/// Hit boxes shrink to this fraction of the combined half-widths.
const HIT_FORGIVENESS: f32 = 0.9;

const PUDDLE_Z_MIN: f32 = -100.0;
const PUDDLE_Z_MAX: f32 = 250.0;
const PUDDLE_HALF_WIDTH: f32 = 0.7;

const AVOID_DISTANCE: f32 = 600.0;
const AVOID_OVERLAP: f32 = 0.8;
const AVOID_SHIFT: f32 = 1.5;
const AVOID_LIMIT: f32 = 2.0;
const AVOID_LANE_SPEED: f32 = 2.0;
const DEFAULT_LANE_SPEED: f32 = 1.0;

const ROCK_KNOCKBACK: f32 = 0.2;
const CAR_KNOCKBACK: f32 = 0.3;
/// Closing speed above which a rear-end bounces the player backwards.
const CAR_RECOIL_MARGIN: f32 = 2000.0;
const CAR_RECOIL_SPEED: f32 = -2000.0;
const CAR_PIN_DISTANCE: f32 = 250.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rock {
    pub z: f32,
    pub x: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Puddle {
    pub z: f32,
    pub x: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrafficCar {
    pub z: f32,
    pub x: f32,
    pub speed: f32,
    pub target_x: f32,
    pub lane_change_speed: f32,
}

impl TrafficCar {
    pub fn new(z: f32, x: f32, speed: f32) -> Self {
        Self {
            z,
            x,
            speed,
            target_x: x,
            lane_change_speed: DEFAULT_LANE_SPEED,
        }
    }

    fn changing_lane(&self) -> bool {
        (self.x - self.target_x).abs() >= 0.1
    }

    fn steer(&mut self, dt: f32) {
        if (self.x - self.target_x).abs() <= 0.05 {
            return;
        }
        let dir = (self.target_x - self.x).signum();
        self.x += dir * self.lane_change_speed * dt;
        if (dir > 0.0 && self.x > self.target_x) || (dir < 0.0 && self.x < self.target_x) {
            self.x = self.target_x;
        }
    }
}

/// What a hazard tick asks the engine to apply.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CollisionOutcome {
    pub hit: bool,
    /// Knockback is running; the engine locks driver input.
    pub knockback: bool,
    pub speed_override: Option<f32>,
    pub force_position: Option<f32>,
    /// Trigger the impact effect.
    pub impact: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HazardCounts {
    pub rocks: usize,
    pub cars: usize,
    pub puddles: usize,
}

impl HazardCounts {
    pub fn for_difficulty(difficulty: Difficulty) -> Self {
        match difficulty {
            Difficulty::Easy => Self { rocks: 25, cars: 10, puddles: 10 },
            Difficulty::Medium => Self { rocks: 50, cars: 20, puddles: 20 },
            Difficulty::Hard => Self { rocks: 80, cars: 40, puddles: 40 },
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ObstacleField {
    rocks: Vec<Rock>,
    cars: Vec<TrafficCar>,
    puddles: Vec<Puddle>,
    track_length: f32,
    knockback_timer: f32,
}

fn overlaps(dz: f32, dx: f32, player_w: f32, entity_w: f32) -> bool {
    dz > HIT_Z_MIN && dz < HIT_Z_MAX && dx.abs() < (player_w + entity_w) / 2.0 * HIT_FORGIVENESS
}

impl ObstacleField {
    pub fn new(track_length: f32) -> Self {
        Self {
            track_length,
            ..Self::default()
        }
    }

    /// A field with hand-placed hazards.
    pub fn with_hazards(track_length: f32, rocks: Vec<Rock>, cars: Vec<TrafficCar>, puddles: Vec<Puddle>) -> Self {
        Self {
            rocks,
            cars,
            puddles,
            track_length,
            knockback_timer: 0.0,
        }
    }

    /// Replaces every hazard with a fresh random population.
    pub fn populate<R: Rng + ?Sized>(&mut self, track_length: f32, difficulty: Difficulty, rng: &mut R) {
        let counts = HazardCounts::for_difficulty(difficulty);
        self.track_length = track_length;
        self.knockback_timer = 0.0;
        let span = (track_length - 2.0 * SPAWN_MARGIN).max(0.0);
        let spawn_z = |r: f32| SPAWN_MARGIN + r * span;

        self.rocks = (0..counts.rocks)
            .map(|_| {
                let z = spawn_z(rng.random());
                let x = if rng.random::<f32>() > 0.4 {
                    rng.random::<f32>() * 2.0 - 1.0
                } else {
                    let side = if rng.random::<f32>() > 0.5 { 1.0 } else { -1.0 };
                    side * (1.2 + rng.random::<f32>() * 2.0)
                };
                Rock { z, x }
            })
            .collect();

        self.cars = (0..counts.cars)
            .map(|_| {
                let z = spawn_z(rng.random());
                let x = rng.random::<f32>() * 1.2 - 0.6;
                let speed = TRAFFIC_REFERENCE_SPEED * (0.4 + rng.random::<f32>() * 0.2);
                TrafficCar::new(z, x, speed)
            })
            .collect();

        self.puddles = (0..counts.puddles)
            .map(|_| Puddle {
                z: spawn_z(rng.random()),
                x: rng.random::<f32>() * 1.6 - 0.8,
            })
            .collect();

        tracing::debug!(
            "Spawned {} rocks, {} cars, {} puddles for {} track",
            self.rocks.len(),
            self.cars.len(),
            self.puddles.len(),
            difficulty
        );
    }

    pub fn rocks(&self) -> &[Rock] {
        &self.rocks
    }

    pub fn cars(&self) -> &[TrafficCar] {
        &self.cars
    }

    pub fn puddles(&self) -> &[Puddle] {
        &self.puddles
    }

    pub fn knockback_remaining(&self) -> f32 {
        self.knockback_timer.max(0.0)
    }

    /// Advances traffic and hit-tests the player.
    ///
    /// While a knockback is running the timer counts down and nothing is
    /// hit-tested, so a stopped player can steer clear.
    pub fn tick(&mut self, dt: f32, player_z: f32, player_x: f32, player_speed: f32) -> CollisionOutcome {
        if self.knockback_timer > 0.0 {
            self.knockback_timer -= dt;
            return CollisionOutcome {
                knockback: true,
                ..CollisionOutcome::default()
            };
        }

        let length = self.track_length;
        for car in self.cars.iter_mut() {
            car.z += car.speed * dt;
            if length > 0.0 && car.z >= length {
                car.z -= length;
            }
            car.steer(dt);
            Self::avoid(car, player_z, player_x, length);
        }

        if self
            .rocks
            .iter()
            .any(|rock| overlaps(ring_delta(rock.z, player_z, length), player_x - rock.x, 0.5, 0.4))
        {
            self.knockback_timer = ROCK_KNOCKBACK;
            tracing::debug!("Rock hit at z={:.0}", player_z);
            return CollisionOutcome {
                hit: true,
                knockback: true,
                speed_override: Some(0.0),
                force_position: None,
                impact: true,
            };
        }

        let car_hit = self
            .cars
            .iter()
            .find(|car| overlaps(ring_delta(car.z, player_z, length), player_x - car.x, 0.4, 0.5))
            .copied();
        if let Some(car) = car_hit {
            self.knockback_timer = CAR_KNOCKBACK;
            let speed = if player_speed > car.speed + CAR_RECOIL_MARGIN {
                CAR_RECOIL_SPEED
            } else {
                car.speed * 0.8
            };
            tracing::debug!("Car hit at z={:.0}, speed now {:.0}", player_z, speed);
            return CollisionOutcome {
                hit: true,
                knockback: true,
                speed_override: Some(speed),
                force_position: Some(car.z - CAR_PIN_DISTANCE),
                impact: true,
            };
        }

        CollisionOutcome::default()
    }

    /// Pulls a car out of the way of a player closing in from behind.
    fn avoid(car: &mut TrafficCar, player_z: f32, player_x: f32, length: f32) {
        let dz = ring_delta(car.z, player_z, length);
        if dz <= 0.0 || dz >= AVOID_DISTANCE {
            return;
        }
        if (car.x - player_x).abs() >= AVOID_OVERLAP || car.changing_lane() {
            return;
        }
        let shifted = if car.x > 0.0 {
            car.x - AVOID_SHIFT
        } else {
            car.x + AVOID_SHIFT
        };
        car.target_x = shifted.clamp(-AVOID_LIMIT, AVOID_LIMIT);
        car.lane_change_speed = AVOID_LANE_SPEED;
    }

    /// Whether the player is over a puddle. Unaffected by knockback.
    pub fn on_puddle(&self, player_z: f32, player_x: f32) -> bool {
        self.puddles.iter().any(|puddle| {
            let dz = ring_delta(puddle.z, player_z, self.track_length);
            dz > PUDDLE_Z_MIN && dz < PUDDLE_Z_MAX && (player_x - puddle.x).abs() < PUDDLE_HALF_WIDTH
        })
    }

    fn segment_of(z: f32, segment_count: usize) -> usize {
        if segment_count == 0 {
            return 0;
        }
        (z.max(0.0) / SEGMENT_LENGTH).floor() as usize % segment_count
    }

    pub fn rocks_in(&self, segment: usize, segment_count: usize) -> impl Iterator<Item = &Rock> + '_ {
        self.rocks
            .iter()
            .filter(move |rock| Self::segment_of(rock.z, segment_count) == segment)
    }

    pub fn cars_in(&self, segment: usize, segment_count: usize) -> impl Iterator<Item = &TrafficCar> + '_ {
        self.cars
            .iter()
            .filter(move |car| Self::segment_of(car.z, segment_count) == segment)
    }

    pub fn puddles_in(&self, segment: usize, segment_count: usize) -> impl Iterator<Item = &Puddle> + '_ {
        self.puddles
            .iter()
            .filter(move |puddle| Self::segment_of(puddle.z, segment_count) == segment)
    }
}
