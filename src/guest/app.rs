//! Simulation state behind one app pointer
//!
//! The physics here is deliberately simple (instantaneous Coulomb and
//! Biot-Savart fields from prescribed charge trajectories). It only has to
//! produce something to draw and describe.

use std::cmp::Ordering;
use std::f64::consts::PI;
use std::fmt::Write;
use std::str::FromStr;

use super::input::{Gesture, Keys, Touches};
use super::math::{self, Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    Static,
    Eom,
    LineOscillate,
    LineOscillateEom,
    Dipole,
    Random,
    Circle,
}

impl Preset {
    pub fn name(self) -> &'static str {
        match self {
            Preset::Static => "static",
            Preset::Eom => "eom",
            Preset::LineOscillate => "line_o",
            Preset::LineOscillateEom => "o_eom",
            Preset::Dipole => "dipole",
            Preset::Random => "random",
            Preset::Circle => "circle",
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(Preset::Static),
            "eom" => Ok(Preset::Eom),
            "line_o" => Ok(Preset::LineOscillate),
            "o_eom" => Ok(Preset::LineOscillateEom),
            "dipole" => Ok(Preset::Dipole),
            "random" => Ok(Preset::Random),
            "circle" => Ok(Preset::Circle),
            other => Err(format!("unknown charge preset: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Motion {
    Fixed(Vec3),
    Drift { start: Vec3, velocity: Vec3 },
    Oscillate { center: Vec3, axis: Vec3, amplitude: f64, omega: f64 },
    Circle { radius: f64, omega: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Charge {
    pub q: f64,
    motion: Motion,
}

impl Charge {
    fn new(q: f64, motion: Motion) -> Self {
        Charge { q, motion }
    }

    pub fn position(&self, t: f64) -> Vec3 {
        match self.motion {
            Motion::Fixed(x) => x,
            Motion::Drift { start, velocity } => math::add(start, math::scale(velocity, t)),
            Motion::Oscillate { center, axis, amplitude, omega } => {
                math::add(center, math::scale(axis, amplitude * (omega * t).sin()))
            }
            Motion::Circle { radius, omega } => {
                [radius * (omega * t).cos(), radius * (omega * t).sin(), 0.0]
            }
        }
    }

    /// Run the trajectory `ratio` times faster; the position at `t / ratio`
    /// is the old position at `t`
    fn rescale(&mut self, ratio: f64) {
        match &mut self.motion {
            Motion::Fixed(_) => {}
            Motion::Drift { velocity, .. } => *velocity = math::scale(*velocity, ratio),
            Motion::Oscillate { omega, .. } | Motion::Circle { omega, .. } => *omega *= ratio,
        }
    }

    pub fn velocity(&self, t: f64) -> Vec3 {
        match self.motion {
            Motion::Fixed(_) => [0.0; 3],
            Motion::Drift { velocity, .. } => velocity,
            Motion::Oscillate { axis, amplitude, omega, .. } => {
                math::scale(axis, amplitude * omega * (omega * t).cos())
            }
            Motion::Circle { radius, omega } => {
                [-radius * omega * (omega * t).sin(), radius * omega * (omega * t).cos(), 0.0]
            }
        }
    }
}

/// Deterministic generator for the "random" preset
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

fn charges_for(preset: Preset, c: f64) -> (Vec<Charge>, Vec3) {
    let near = [0.0, 0.0, 20.0];
    let far = [0.0, 0.0, 30.0];
    match preset {
        Preset::Static => (
            vec![
                Charge::new(1.0, Motion::Fixed([-2.0, 0.0, 0.0])),
                Charge::new(-1.0, Motion::Fixed([2.0, 0.0, 0.0])),
            ],
            near,
        ),
        Preset::Eom => (
            vec![
                Charge::new(1.0, Motion::Drift { start: [-3.0, 0.0, 0.0], velocity: [0.0, 0.3 * c, 0.0] }),
                Charge::new(-1.0, Motion::Drift { start: [3.0, 0.0, 0.0], velocity: [0.0, -0.3 * c, 0.0] }),
            ],
            far,
        ),
        Preset::LineOscillate => (
            vec![Charge::new(
                1.0,
                Motion::Oscillate { center: [0.0; 3], axis: [1.0, 0.0, 0.0], amplitude: 2.0, omega: 0.25 * c },
            )],
            near,
        ),
        Preset::LineOscillateEom => (
            vec![
                Charge::new(
                    1.0,
                    Motion::Oscillate { center: [0.0; 3], axis: [1.0, 0.0, 0.0], amplitude: 2.0, omega: 0.25 * c },
                ),
                Charge::new(-1.0, Motion::Drift { start: [0.0, 5.0, 0.0], velocity: [0.1 * c, 0.0, 0.0] }),
            ],
            near,
        ),
        Preset::Dipole => (
            vec![
                Charge::new(
                    1.0,
                    Motion::Oscillate { center: [0.0; 3], axis: [0.0, 1.0, 0.0], amplitude: 1.0, omega: 0.5 * c },
                ),
                Charge::new(
                    -1.0,
                    Motion::Oscillate { center: [0.0; 3], axis: [0.0, -1.0, 0.0], amplitude: 1.0, omega: 0.5 * c },
                ),
            ],
            near,
        ),
        Preset::Random => {
            let mut rng = Lcg(0x5eed);
            let charges = (0..10)
                .map(|i| {
                    let q = if i % 2 == 0 { 1.0 } else { -1.0 };
                    let start = [rng.range(-10.0, 10.0), rng.range(-10.0, 10.0), rng.range(-2.0, 2.0)];
                    let velocity = [rng.range(-0.2, 0.2) * c, rng.range(-0.2, 0.2) * c, 0.0];
                    Charge::new(q, Motion::Drift { start, velocity })
                })
                .collect();
            (charges, far)
        }
        Preset::Circle => (
            vec![Charge::new(1.0, Motion::Circle { radius: 5.0, omega: 0.5 * c / 5.0 })],
            near,
        ),
    }
}

pub struct Player {
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f64,
}

impl Player {
    fn new(position: Vec3) -> Self {
        Player { position, velocity: [0.0; 3], yaw: 0.0 }
    }

    pub fn gamma(&self, c: f64) -> f64 {
        let beta2 = math::norm2(self.velocity) / (c * c);
        1.0 / (1.0 - beta2.min(0.9999)).sqrt()
    }

    fn tick(&mut self, c: f64, dt: f64, keys: &Keys, gestures: &[Gesture]) {
        let mut thrust = [0.0; 3];
        for (key, dir) in [
            ("w", [0.0, 0.0, -1.0]),
            ("s", [0.0, 0.0, 1.0]),
            ("a", [-1.0, 0.0, 0.0]),
            ("d", [1.0, 0.0, 0.0]),
            ("e", [0.0, 1.0, 0.0]),
            ("q", [0.0, -1.0, 0.0]),
        ] {
            if keys.is_pressed(key) {
                thrust = math::add(thrust, dir);
            }
        }
        let heading = Mat4::rotation_y(self.yaw);
        let thrust = heading.transform_point(thrust);

        self.velocity = math::add(self.velocity, math::scale(thrust, 0.5 * c * dt));
        if thrust == [0.0; 3] {
            self.velocity = math::scale(self.velocity, (1.0 - 2.0 * dt).max(0.0));
        }
        let speed = math::norm(self.velocity);
        if speed > 0.99 * c {
            self.velocity = math::scale(self.velocity, 0.99 * c / speed);
        }
        self.position = math::add(self.position, math::scale(self.velocity, dt));

        for g in gestures {
            match *g {
                Gesture::Drag { dx, .. } => self.yaw += dx * PI,
                Gesture::Pinch(rate) if rate > 0.0 => {
                    self.position = math::scale(self.position, 1.0 / rate);
                }
                Gesture::Pinch(_) => {}
            }
        }
    }
}

pub struct Physics {
    pub c: f64,
    pub preset: Preset,
    pub charges: Vec<Charge>,
    pub player: Player,
    pub time: f64,
}

impl Physics {
    pub fn new(c: f64, preset: Preset) -> Self {
        let (charges, start) = charges_for(preset, c);
        Physics { c, preset, charges, player: Player::new(start), time: 0.0 }
    }

    /// Returns true when the simulation had to be restarted
    ///
    /// A faster light speed rescales every velocity so each keeps its fraction
    /// of c, and positions stay where they are. A slower one could leave
    /// charges moving faster than light, so the preset is rebuilt.
    pub fn change_c(&mut self, c: f64) -> bool {
        match self.c.total_cmp(&c) {
            Ordering::Less => {
                let ratio = c / self.c;
                for charge in &mut self.charges {
                    charge.rescale(ratio);
                }
                self.player.velocity = math::scale(self.player.velocity, ratio);
                self.time /= ratio;
                self.c = c;
                false
            }
            Ordering::Equal => false,
            Ordering::Greater => {
                *self = Physics::new(c, self.preset);
                true
            }
        }
    }

    fn tick(&mut self, dt: f64, keys: &Keys, gestures: &[Gesture]) {
        self.time += dt;
        self.player.tick(self.c, dt, keys, gestures);
    }

    /// Electric and magnetic field at `point`
    pub fn field_at(&self, point: Vec3) -> (Vec3, Vec3) {
        let mut e = [0.0; 3];
        let mut b = [0.0; 3];
        for charge in &self.charges {
            let r = math::sub(point, charge.position(self.time));
            let d2 = math::norm2(r);
            if d2 < 1e-6 {
                continue;
            }
            let ei = math::scale(r, charge.q / (d2 * d2.sqrt()));
            let beta = math::scale(charge.velocity(self.time), 1.0 / self.c);
            e = math::add(e, ei);
            b = math::add(b, math::cross(beta, ei));
        }
        (e, b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grid {
    Surface,
    Bulk,
}

impl Grid {
    pub fn parse(s: &str) -> Option<Grid> {
        match s {
            "2d" => Some(Grid::Surface),
            "3d" => Some(Grid::Bulk),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Grid::Surface => "2d",
            Grid::Bulk => "3d",
        }
    }

    pub fn points(self) -> Vec<Vec3> {
        let mut points = Vec::new();
        match self {
            Grid::Surface => {
                for x in -8..=8 {
                    for y in -8..=8 {
                        points.push([x as f64, y as f64, 0.0]);
                    }
                }
            }
            Grid::Bulk => {
                for x in -3..=3 {
                    for y in -3..=3 {
                        for z in -3..=3 {
                            points.push([2.0 * x as f64, 2.0 * y as f64, 2.0 * z as f64]);
                        }
                    }
                }
            }
        }
        points
    }

    pub fn charge_scale(self) -> f64 {
        match self {
            Grid::Surface => 0.2,
            Grid::Bulk => 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrowConfig {
    pub log_count: u8,
    pub length_factor: f64,
}

impl Default for ArrowConfig {
    fn default() -> Self {
        ArrowConfig { log_count: 1, length_factor: 1.0 }
    }
}

impl ArrowConfig {
    pub fn arrow_length(&self, magnitude: f64) -> f64 {
        let mut length = magnitude * self.length_factor;
        for _ in 0..self.log_count {
            length = (1.0 + length).ln();
        }
        length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mesh {
    Marker,
    Arrow,
}

pub const RED: [f32; 4] = [1.0, 0.2, 0.2, 1.0];
pub const BLUE: [f32; 4] = [0.2, 0.4, 1.0, 1.0];
pub const GREEN: [f32; 4] = [0.2, 1.0, 0.4, 1.0];
pub const ORANGE: [f32; 4] = [1.0, 0.6, 0.1, 1.0];
pub const HOTPINK: [f32; 4] = [1.0, 0.4, 0.7, 1.0];

/// One draw call worth of uniforms
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub mesh: Mesh,
    pub color: [f32; 4],
    pub mvp: [f32; 16],
    pub normal: [f32; 9],
}

const FIELD_EPSILON: f64 = 1e-16;

pub struct Scene {
    pub physics: Physics,
    pub keys: Keys,
    pub touches: Touches,
    pub last_tick: Option<f64>,
    pub grid: Grid,
    pub points: Vec<Vec3>,
    pub arrows: ArrowConfig,
    pub electric_on: bool,
    pub magnetic_on: bool,
    pub poynting_on: bool,
    pub correct_lorentz: bool,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl Scene {
    pub fn new() -> Self {
        Scene {
            physics: Physics::new(1.0, Preset::Static),
            keys: Keys::default(),
            touches: Touches::default(),
            last_tick: None,
            grid: Grid::Surface,
            points: Grid::Surface.points(),
            arrows: ArrowConfig::default(),
            electric_on: true,
            magnetic_on: true,
            poynting_on: false,
            correct_lorentz: true,
        }
    }

    pub fn restart(&mut self) {
        self.physics = Physics::new(self.physics.c, self.physics.preset);
    }

    pub fn reset_charge(&mut self, preset: Preset) {
        self.physics = Physics::new(self.physics.c, preset);
    }

    /// Unknown grid names leave the grid unchanged
    pub fn reset_grid(&mut self, name: &str) {
        if let Some(grid) = Grid::parse(name) {
            self.grid = grid;
            self.points = grid.points();
        }
    }

    /// Advance the simulation to `timestamp` (ms) and produce the frame's draw list
    ///
    /// `viewport` is the current drawing buffer size in pixels.
    pub fn frame(&mut self, timestamp: f64, viewport: (f64, f64)) -> Vec<DrawItem> {
        let last = self.last_tick.replace(timestamp);
        let dt = ((timestamp - last.unwrap_or(timestamp)) / 1000.0).max(0.0);

        let (width, height) = viewport;
        let aspect = if width > 0.0 && height > 0.0 { width / height } else { 1.0 };
        let gestures: Vec<Gesture> = self.touches.take_gesture(width, height).into_iter().collect();
        self.physics.tick(dt, &self.keys, &gestures);

        let c = self.physics.c;
        let player = &self.physics.player;
        let view = Mat4::rotation_y(-player.yaw);
        let view_projection = Mat4::perspective(PI / 3.0, aspect, 0.1, 10000.0).mul(&view);

        let gamma = player.gamma(c);
        let heading = if math::norm2(player.velocity) > 0.0 {
            Some(math::scale(player.velocity, 1.0 / math::norm(player.velocity)))
        } else {
            None
        };
        let contract = |r: Vec3| -> Vec3 {
            match heading {
                Some(n) if self.correct_lorentz => {
                    let along = math::dot(r, n);
                    math::sub(r, math::scale(n, along * (1.0 - 1.0 / gamma)))
                }
                _ => r,
            }
        };

        let mut items = Vec::new();
        let charge_scale = Mat4::scaling([self.grid.charge_scale(); 3]);
        for charge in &self.physics.charges {
            let pos = contract(math::sub(charge.position(self.physics.time), player.position));
            let model = Mat4::translation(pos).mul(&charge_scale);
            items.push(DrawItem {
                mesh: Mesh::Marker,
                color: if charge.q > 0.0 { RED } else { BLUE },
                mvp: view_projection.mul(&model).to_f32(),
                normal: view.upper3_f32(),
            });
        }

        for &point in &self.points {
            let (e, b) = self.physics.field_at(point);
            let origin = Mat4::translation(contract(math::sub(point, player.position)));
            let mut arrow = |v: Vec3, color: [f32; 4]| {
                let rotate = Mat4::rotation_from_z(v);
                let length = self.arrows.arrow_length(math::norm(v));
                let model = origin.mul(&rotate).mul(&Mat4::scaling([1.0, 1.0, length]));
                items.push(DrawItem {
                    mesh: Mesh::Arrow,
                    color,
                    mvp: view_projection.mul(&model).to_f32(),
                    normal: view.mul(&rotate).upper3_f32(),
                });
            };
            if self.poynting_on {
                let s = math::scale(math::cross(e, b), c * c);
                if math::norm2(s) > FIELD_EPSILON {
                    arrow(s, HOTPINK);
                }
                continue;
            }
            if self.electric_on && math::norm2(e) > FIELD_EPSILON {
                arrow(e, GREEN);
            }
            if self.magnetic_on && math::norm2(b) > FIELD_EPSILON {
                arrow(b, ORANGE);
            }
        }
        items
    }

    pub fn info(&self) -> String {
        let p = &self.physics;
        let fmt3 = |v: Vec3| format!("({:.3}, {:.3}, {:.3})", v[0], v[1], v[2]);
        let mut s = String::new();
        let _ = writeln!(s, "preset = {}", p.preset.name());
        let _ = writeln!(s, "c = {}", p.c);
        let _ = writeln!(s, "t = {:.3}", p.time);
        let _ = writeln!(s, "player x = {}", fmt3(p.player.position));
        let _ = writeln!(s, "player v = {}", fmt3(p.player.velocity));
        let _ = writeln!(s, "player yaw = {:.3}", p.player.yaw);
        let _ = writeln!(s, "player gamma = {:.3}", p.player.gamma(p.c));
        let _ = writeln!(s, "grid = {} ({} points)", self.grid.name(), self.points.len());
        for (i, charge) in p.charges.iter().enumerate() {
            let _ = writeln!(
                s,
                "charge {}: q = {:+}, x = {}, v = {}",
                i,
                charge.q,
                fmt3(charge.position(p.time)),
                fmt3(charge.velocity(p.time))
            );
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_names_round_trip() {
        for name in ["static", "eom", "line_o", "o_eom", "dipole", "random", "circle"] {
            assert_eq!(name.parse::<Preset>().unwrap().name(), name);
        }
        assert!("pendulum".parse::<Preset>().is_err());
    }

    #[test]
    fn test_change_c_restart_rule() {
        let mut p = Physics::new(1.0, Preset::Circle);
        p.time = 3.0;
        assert!(!p.change_c(2.0));
        assert_eq!(p.time, 1.5);
        assert!(!p.change_c(2.0));
        assert!(p.change_c(0.5));
        assert_eq!(p.time, 0.0);
        assert_eq!(p.c, 0.5);
        assert_eq!(p.preset, Preset::Circle);
    }

    #[test]
    fn test_faster_light_keeps_positions_and_beta() {
        let mut p = Physics::new(1.0, Preset::Circle);
        p.time = 3.0;
        p.player.velocity = [0.3, 0.0, 0.0];
        let position = p.charges[0].position(p.time);
        let speed = math::norm(p.charges[0].velocity(p.time));
        let gamma = p.player.gamma(p.c);

        assert!(!p.change_c(4.0));
        let moved = math::sub(p.charges[0].position(p.time), position);
        assert!(math::norm(moved) < 1e-12);
        assert!((math::norm(p.charges[0].velocity(p.time)) - 4.0 * speed).abs() < 1e-12);
        assert_eq!(p.player.velocity, [1.2, 0.0, 0.0]);
        assert!((p.player.gamma(p.c) - gamma).abs() < 1e-12);
    }

    #[test]
    fn test_circle_charge_speed() {
        let p = Physics::new(1.0, Preset::Circle);
        let v = p.charges[0].velocity(1.7);
        assert!((math::norm(v) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_static_field_points_away_from_positive_charge() {
        let p = Physics::new(1.0, Preset::Static);
        let (e, b) = p.field_at([-2.0, 5.0, 0.0]);
        assert!(e[1] > 0.0);
        assert_eq!(b, [0.0; 3]);
    }

    #[test]
    fn test_unknown_grid_is_ignored() {
        let mut scene = Scene::new();
        scene.reset_grid("4d");
        assert_eq!(scene.grid, Grid::Surface);
        scene.reset_grid("3d");
        assert_eq!(scene.points.len(), 343);
    }

    #[test]
    fn test_frame_draw_counts() {
        let mut scene = Scene::new();
        let items = scene.frame(0.0, (800.0, 600.0));
        let markers = items.iter().filter(|i| i.mesh == Mesh::Marker).count();
        assert_eq!(markers, 2);
        // static charges: electric arrows only, one per grid point off the charges
        let arrows = items.len() - markers;
        assert_eq!(arrows, scene.points.len());

        scene.poynting_on = true;
        let items = scene.frame(16.6, (800.0, 600.0));
        assert_eq!(items.iter().filter(|i| i.mesh == Mesh::Arrow).count(), 0);
    }

    #[test]
    fn test_two_fingers_then_one_does_not_turn_the_player() {
        let mut scene = Scene::new();
        scene.touches.start(1000.0, &[10.0, 20.0], &[30.0, 40.0]);
        scene.touches.moved(1016.0, &[12.0], &[22.0]);
        scene.frame(1016.0, (800.0, 600.0));
        assert_eq!(scene.physics.player.yaw, 0.0);
        assert_eq!(scene.physics.player.position, [0.0, 0.0, 20.0]);

        scene.touches.moved(1032.0, &[92.0], &[22.0]);
        scene.frame(1032.0, (800.0, 600.0));
        assert!((scene.physics.player.yaw - 0.1 * PI).abs() < 1e-12);
    }

    #[test]
    fn test_empty_viewport_frame_is_finite() {
        let mut scene = Scene::new();
        scene.touches.start(0.0, &[10.0], &[10.0]);
        scene.touches.moved(16.0, &[50.0], &[10.0]);
        let items = scene.frame(16.0, (0.0, 0.0));
        assert_eq!(scene.physics.player.yaw, 0.0);
        assert!(items.iter().all(|i| i.mvp.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_arrow_length_log() {
        let arrows = ArrowConfig { log_count: 2, length_factor: 1.0 };
        let once = (1.0f64 + 1.0).ln();
        assert!((arrows.arrow_length(1.0) - (1.0 + once).ln()).abs() < 1e-12);
    }
}
