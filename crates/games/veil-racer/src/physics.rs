use serde::Serialize;

use veil_core::game::RacerInputs;

use crate::config::RacerConfig;

/// Physical state of one racer on the track.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Runner {
    pub lane: u8,
    pub position: f32,
    pub speed: f32,
    pub boost_remaining: f32,
    pub boost_charges: u8,
    pub lane_cooldown: f32,
    /// Seconds into the race at which the runner crossed the line.
    pub finished_at: Option<f32>,
}

impl Runner {
    pub fn new(lane: u8, cfg: &RacerConfig) -> Self {
        Self {
            lane,
            position: 0.0,
            speed: 0.0,
            boost_remaining: 0.0,
            boost_charges: cfg.boost_charges,
            lane_cooldown: 0.0,
            finished_at: None,
        }
    }

    pub fn is_boosting(&self) -> bool {
        self.boost_remaining > 0.0
    }
}

/// Advance one runner by `dt` seconds against its held inputs.
pub fn update_runner(r: &mut Runner, inputs: &RacerInputs, dt: f32, cfg: &RacerConfig) {
    if r.finished_at.is_some() {
        return;
    }

    r.lane_cooldown = (r.lane_cooldown - dt).max(0.0);
    r.boost_remaining = (r.boost_remaining - dt).max(0.0);

    // Boost consumes one charge and raises the speed clamp for its duration.
    if inputs.boost && r.boost_charges > 0 && !r.is_boosting() {
        r.boost_charges -= 1;
        r.boost_remaining = cfg.boost_duration_secs;
    }

    // Brake wins over accelerate; friction applies when neither is held.
    if inputs.brake {
        r.speed -= cfg.brake_force * dt;
    } else if inputs.accelerate {
        r.speed += cfg.acceleration * dt;
    } else {
        r.speed -= cfg.friction * dt;
    }

    let cap = if r.is_boosting() {
        cfg.boost_speed
    } else {
        cfg.max_speed
    };
    r.speed = r.speed.clamp(0.0, cap);

    // Lane change is instant but gated by the cooldown and track bounds.
    if r.lane_cooldown <= 0.0 {
        if inputs.left && r.lane > 0 {
            r.lane -= 1;
            r.lane_cooldown = cfg.lane_change_cooldown_secs;
        } else if inputs.right && r.lane + 1 < cfg.lane_count {
            r.lane += 1;
            r.lane_cooldown = cfg.lane_change_cooldown_secs;
        }
    }

    r.position += r.speed * dt;
}
