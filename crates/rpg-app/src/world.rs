// SPDX-License-Identifier: CEPL-1.0
//! Small demo world feeding the scene assembler.

use anyhow::{bail, Result};
use rpg_math::glam::IVec2;
use rpg_math::{vec2, Camera2D, Vec2};
use rpg_render::{push_quad, SceneLayer, Vertex, VertexSource};
use tracing::{debug, info};

pub const VIEW_DISTANCE: f32 = 15.0;
pub const SIGHT_RADIUS: f32 = 6.0;
pub const MOVE_COOLDOWN: f32 = 0.15;
pub const ENEMY_STEP: f32 = 0.5;
pub const CHASE_RADIUS: f32 = 10.0;
pub const ATTACK_COOLDOWN: f32 = 1.0;
pub const EFFECT_LIFETIME: f32 = 0.4;

const EXPLORED_DIM: f32 = 0.35;

pub const MAP: &str = "\
##############################
#............#...............#
#..P.........#.......E.......#
#............#...............#
#.....!......................#
#............#.......#####...#
######.#######.......#...#...#
#..........#.........#.E.#...#
#..........#.............#...#
#....E.....#.........#####...#
#..........#....!............#
##############################";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tile {
    Floor,
    Wall,
}

/// What the player asked for this tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Intent {
    pub step: Option<IVec2>,
    pub attack: bool,
}

#[derive(Debug)]
pub struct Level {
    width: i32,
    height: i32,
    tiles: Vec<Tile>,
    explored: Vec<bool>,
}

#[derive(Debug, Default)]
pub struct Spawns {
    pub player: Option<IVec2>,
    pub enemies: Vec<IVec2>,
    pub items: Vec<IVec2>,
}

impl Level {
    /// `#` wall, `.` floor, `P` player, `E` enemy, `!` item (all on floor).
    pub fn parse(map: &str) -> Result<(Self, Spawns)> {
        let rows: Vec<&str> = map.lines().filter(|l| !l.is_empty()).collect();
        let Some(width) = rows.first().map(|r| r.len()) else {
            bail!("empty map");
        };
        let mut tiles = Vec::with_capacity(width * rows.len());
        let mut spawns = Spawns::default();
        for (y, row) in rows.iter().enumerate() {
            if row.len() != width {
                bail!("map row {y} has {} columns, expected {width}", row.len());
            }
            for (x, ch) in row.chars().enumerate() {
                let at = IVec2::new(x as i32, y as i32);
                tiles.push(match ch {
                    '#' => Tile::Wall,
                    '.' => Tile::Floor,
                    'P' => {
                        spawns.player = Some(at);
                        Tile::Floor
                    }
                    'E' => {
                        spawns.enemies.push(at);
                        Tile::Floor
                    }
                    '!' => {
                        spawns.items.push(at);
                        Tile::Floor
                    }
                    other => bail!("unknown map glyph {other:?} at ({x}, {y})"),
                });
            }
        }
        let explored = vec![false; tiles.len()];
        Ok((
            Self {
                width: width as i32,
                height: rows.len() as i32,
                tiles,
                explored,
            },
            spawns,
        ))
    }

    fn index(&self, p: IVec2) -> Option<usize> {
        (p.x >= 0 && p.y >= 0 && p.x < self.width && p.y < self.height)
            .then(|| (p.y * self.width + p.x) as usize)
    }

    pub fn tile(&self, p: IVec2) -> Option<Tile> {
        self.index(p).map(|i| self.tiles[i])
    }

    pub fn is_walkable(&self, p: IVec2) -> bool {
        self.tile(p) == Some(Tile::Floor)
    }

    pub fn is_explored(&self, p: IVec2) -> bool {
        self.index(p).is_some_and(|i| self.explored[i])
    }

    /// Marks every tile within `radius` of `center` as explored.
    pub fn reveal(&mut self, center: IVec2, radius: f32) {
        let r = radius.ceil() as i32;
        for y in center.y - r..=center.y + r {
            for x in center.x - r..=center.x + r {
                let p = IVec2::new(x, y);
                if distance(p, center) <= radius {
                    if let Some(i) = self.index(p) {
                        self.explored[i] = true;
                    }
                }
            }
        }
    }
}

fn distance(a: IVec2, b: IVec2) -> f32 {
    (a - b).as_vec2().length()
}

fn tile_quad(out: &mut Vec<Vertex>, camera: &Camera2D, p: IVec2, inset: f32, color: [f32; 3]) {
    let extent = camera.tile_extent();
    let origin = camera.world_to_clip(p.as_vec2()) + Vec2::splat(inset * extent);
    let size = Vec2::splat(extent * (1.0 - 2.0 * inset));
    push_quad(out, origin, size, color);
}

fn scale(color: [f32; 3], k: f32) -> [f32; 3] {
    color.map(|c| c * k)
}

/// Terrain view: tiles beyond the view distance are culled, explored tiles
/// outside the player's sight are dimmed, unexplored tiles are not drawn.
pub struct Terrain<'a> {
    pub level: &'a Level,
    pub viewer: IVec2,
}

impl VertexSource for Terrain<'_> {
    fn layer(&self) -> SceneLayer {
        SceneLayer::Terrain
    }

    fn generate_vertices(&self, camera: &Camera2D) -> Vec<Vertex> {
        let level = self.level;
        let mut out = Vec::new();
        for y in 0..level.height {
            for x in 0..level.width {
                let p = IVec2::new(x, y);
                let d = distance(p, self.viewer);
                if d > VIEW_DISTANCE || !level.is_explored(p) {
                    continue;
                }
                let base = match level.tile(p) {
                    Some(Tile::Wall) => [0.45, 0.42, 0.40],
                    _ => [0.12, 0.22, 0.12],
                };
                let color = if d <= SIGHT_RADIUS {
                    base
                } else {
                    scale(base, EXPLORED_DIM)
                };
                tile_quad(&mut out, camera, p, 0.0, color);
            }
        }
        out
    }
}

#[derive(Debug)]
pub struct Player {
    pub pos: IVec2,
    pub health: i32,
    pub max_health: i32,
    move_timer: f32,
}

impl Player {
    pub fn new(pos: IVec2) -> Self {
        Self {
            pos,
            health: 100,
            max_health: 100,
            move_timer: 0.0,
        }
    }

    /// Grid step, at most one per `MOVE_COOLDOWN`.
    fn try_step(&mut self, dt: f32, step: Option<IVec2>, level: &Level, blocked: impl Fn(IVec2) -> bool) {
        self.move_timer = (self.move_timer - dt).max(0.0);
        let Some(step) = step else {
            return;
        };
        if self.move_timer > 0.0 {
            return;
        }
        let next = self.pos + step;
        if level.is_walkable(next) && !blocked(next) {
            self.pos = next;
            self.move_timer = MOVE_COOLDOWN;
        }
    }

    pub fn is_alive(&self) -> bool {
        self.health > 0
    }
}

impl VertexSource for Player {
    fn layer(&self) -> SceneLayer {
        SceneLayer::Actors
    }

    fn generate_vertices(&self, camera: &Camera2D) -> Vec<Vertex> {
        let mut out = Vec::with_capacity(6);
        tile_quad(&mut out, camera, self.pos, 0.1, [0.2, 0.5, 1.0]);
        out
    }
}

#[derive(Debug)]
pub struct Enemy {
    pub pos: IVec2,
    pub health: i32,
    step_timer: f32,
    attack_timer: f32,
}

impl Enemy {
    pub fn new(pos: IVec2) -> Self {
        Self {
            pos,
            health: 3,
            step_timer: ENEMY_STEP,
            attack_timer: 0.0,
        }
    }
}

/// Next tile toward `target` along the longer axis, falling back to the
/// shorter one when that is blocked.
fn step_toward(from: IVec2, target: IVec2, open: impl Fn(IVec2) -> bool) -> Option<IVec2> {
    let d = target - from;
    let x = IVec2::new(d.x.signum(), 0);
    let y = IVec2::new(0, d.y.signum());
    let (first, second) = if d.x.abs() >= d.y.abs() { (x, y) } else { (y, x) };
    [first, second]
        .into_iter()
        .filter(|s| *s != IVec2::ZERO)
        .map(|s| from + s)
        .find(|&p| p != target && open(p))
}

#[derive(Debug, Default)]
pub struct Enemies(pub Vec<Enemy>);

impl Enemies {
    /// Chases within `CHASE_RADIUS`; adjacent enemies hit the player instead.
    fn update(&mut self, dt: f32, level: &Level, player: &mut Player) {
        for i in 0..self.0.len() {
            let e = &mut self.0[i];
            e.step_timer -= dt;
            e.attack_timer = (e.attack_timer - dt).max(0.0);
            let d = distance(e.pos, player.pos);

            if d < 1.5 {
                if e.attack_timer <= 0.0 {
                    player.health = (player.health - 5).max(0);
                    e.attack_timer = ATTACK_COOLDOWN;
                    debug!("enemy at {} hits player, health {}", e.pos, player.health);
                }
                continue;
            }
            if d > CHASE_RADIUS || e.step_timer > 0.0 {
                continue;
            }
            e.step_timer = ENEMY_STEP;

            let from = e.pos;
            let others: Vec<IVec2> = self
                .0
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, o)| o.pos)
                .collect();
            if let Some(next) =
                step_toward(from, player.pos, |p| level.is_walkable(p) && !others.contains(&p))
            {
                self.0[i].pos = next;
            }
        }
    }

    fn occupied(&self, p: IVec2) -> bool {
        self.0.iter().any(|e| e.pos == p)
    }
}

impl VertexSource for Enemies {
    fn layer(&self) -> SceneLayer {
        SceneLayer::Actors
    }

    fn generate_vertices(&self, camera: &Camera2D) -> Vec<Vertex> {
        let mut out = Vec::with_capacity(self.0.len() * 6);
        for e in &self.0 {
            tile_quad(&mut out, camera, e.pos, 0.15, [0.9, 0.15, 0.1]);
        }
        out
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
}

impl Rarity {
    /// Deterministic roll from a drop counter.
    fn from_roll(roll: u32) -> Self {
        match roll % 100 {
            96..=99 => Rarity::Legendary,
            81..=95 => Rarity::Epic,
            61..=80 => Rarity::Rare,
            31..=60 => Rarity::Uncommon,
            _ => Rarity::Common,
        }
    }

    pub fn color(self) -> [f32; 3] {
        match self {
            Rarity::Common => [0.8, 0.8, 0.8],
            Rarity::Uncommon => [0.0, 0.8, 0.0],
            Rarity::Rare => [0.0, 0.0, 1.0],
            Rarity::Epic => [0.8, 0.0, 0.8],
            Rarity::Legendary => [1.0, 0.6, 0.0],
        }
    }
}

#[derive(Debug)]
pub struct ItemDrop {
    pub pos: IVec2,
    pub rarity: Rarity,
}

#[derive(Debug, Default)]
pub struct ItemDrops(pub Vec<ItemDrop>);

impl VertexSource for ItemDrops {
    fn layer(&self) -> SceneLayer {
        SceneLayer::ItemDrops
    }

    fn generate_vertices(&self, camera: &Camera2D) -> Vec<Vertex> {
        let mut out = Vec::with_capacity(self.0.len() * 6);
        for item in &self.0 {
            tile_quad(&mut out, camera, item.pos, 0.3, item.rarity.color());
        }
        out
    }
}

#[derive(Debug)]
pub struct Effect {
    pub pos: IVec2,
    age: f32,
}

impl Effect {
    fn progress(&self) -> f32 {
        (self.age / EFFECT_LIFETIME).clamp(0.0, 1.0)
    }
}

/// Hit flashes: grow by half again and fade to black over their lifetime.
#[derive(Debug, Default)]
pub struct Effects(pub Vec<Effect>);

impl Effects {
    fn spawn(&mut self, pos: IVec2) {
        self.0.push(Effect { pos, age: 0.0 });
    }

    fn update(&mut self, dt: f32) {
        for e in &mut self.0 {
            e.age += dt;
        }
        self.0.retain(|e| e.age < EFFECT_LIFETIME);
    }
}

impl VertexSource for Effects {
    fn layer(&self) -> SceneLayer {
        SceneLayer::Effects
    }

    fn generate_vertices(&self, camera: &Camera2D) -> Vec<Vertex> {
        let mut out = Vec::with_capacity(self.0.len() * 6);
        for e in &self.0 {
            let t = e.progress();
            let size = camera.tile_extent() * (1.0 + 0.5 * t);
            let center = camera.world_to_clip(e.pos.as_vec2()) + Vec2::splat(camera.tile_extent() * 0.5);
            push_quad(
                &mut out,
                center - Vec2::splat(size * 0.5),
                Vec2::splat(size),
                scale([1.0, 0.9, 0.3], 1.0 - t),
            );
        }
        out
    }
}

/// Health bar pinned to the top-left corner in clip space.
#[derive(Debug)]
pub struct Hud {
    pub health_fraction: f32,
}

impl Hud {
    const ORIGIN: Vec2 = Vec2::new(-0.95, -0.95);
    const SIZE: Vec2 = Vec2::new(0.5, 0.05);
}

impl VertexSource for Hud {
    fn layer(&self) -> SceneLayer {
        SceneLayer::Ui
    }

    fn generate_vertices(&self, _camera: &Camera2D) -> Vec<Vertex> {
        let mut out = Vec::with_capacity(12);
        push_quad(&mut out, Self::ORIGIN, Self::SIZE, [0.3, 0.05, 0.05]);
        let fill = self.health_fraction.clamp(0.0, 1.0);
        if fill > 0.0 {
            push_quad(
                &mut out,
                Self::ORIGIN,
                vec2(Self::SIZE.x * fill, Self::SIZE.y),
                [0.1, 0.85, 0.2],
            );
        }
        out
    }
}

pub struct World {
    pub level: Level,
    pub player: Player,
    pub enemies: Enemies,
    pub items: ItemDrops,
    pub effects: Effects,
    pub hud: Hud,
    pub camera: Camera2D,
    drops: u32,
}

impl World {
    pub fn from_map(map: &str) -> Result<Self> {
        let (mut level, spawns) = Level::parse(map)?;
        let Some(start) = spawns.player else {
            bail!("map has no player start");
        };
        level.reveal(start, SIGHT_RADIUS);
        let items = spawns
            .items
            .into_iter()
            .enumerate()
            .map(|(i, pos)| ItemDrop {
                pos,
                rarity: Rarity::from_roll(i as u32 * 37),
            })
            .collect();
        info!(
            "world: {}x{} tiles, {} enemies",
            level.width,
            level.height,
            spawns.enemies.len()
        );
        Ok(Self {
            level,
            player: Player::new(start),
            enemies: Enemies(spawns.enemies.into_iter().map(Enemy::new).collect()),
            items: ItemDrops(items),
            effects: Effects::default(),
            hud: Hud {
                health_fraction: 1.0,
            },
            camera: Camera2D::new(start.as_vec2()),
            drops: 0,
        })
    }

    pub fn update(&mut self, dt: f32, intent: Intent) {
        if !self.player.is_alive() {
            self.effects.update(dt);
            return;
        }

        let enemies = &self.enemies;
        self.player
            .try_step(dt, intent.step, &self.level, |p| enemies.occupied(p));
        self.level.reveal(self.player.pos, SIGHT_RADIUS);

        if intent.attack {
            self.attack();
        }
        self.pick_up();

        self.enemies.update(dt, &self.level, &mut self.player);
        self.effects.update(dt);

        self.hud.health_fraction = self.player.health as f32 / self.player.max_health as f32;
        // Camera centers on the middle of the player's tile.
        self.camera.follow(self.player.pos.as_vec2() + Vec2::splat(0.5));
        if !self.player.is_alive() {
            info!("player died");
        }
    }

    /// Hits every adjacent enemy; each hit spawns an effect, kills drop loot.
    fn attack(&mut self) {
        let player = self.player.pos;
        self.effects.spawn(player);
        for e in self.enemies.0.iter_mut().filter(|e| distance(e.pos, player) < 1.5) {
            e.health -= 1;
            self.effects.spawn(e.pos);
        }
        let (dead, alive): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.enemies.0).into_iter().partition(|e| e.health <= 0);
        self.enemies.0 = alive;
        for e in dead {
            self.drops += 1;
            let rarity = Rarity::from_roll(self.drops.wrapping_mul(53));
            info!("enemy at {} defeated, dropped {:?}", e.pos, rarity);
            self.items.0.push(ItemDrop { pos: e.pos, rarity });
        }
    }

    fn pick_up(&mut self) {
        let pos = self.player.pos;
        let before = self.items.0.len();
        self.items.0.retain(|i| {
            if i.pos == pos {
                info!("picked up {:?} item", i.rarity);
                false
            } else {
                true
            }
        });
        let picked = (before - self.items.0.len()) as i32;
        self.player.health = (self.player.health + 10 * picked).min(self.player.max_health);
    }

    pub fn terrain(&self) -> Terrain<'_> {
        Terrain {
            level: &self.level,
            viewer: self.player.pos,
        }
    }
}
