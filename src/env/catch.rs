use anyhow::{Result, ensure};
use burn::config::Config;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use rand::{Rng, SeedableRng, rngs::StdRng};
use strum::{EnumIter, IntoEnumIterator};

use super::{Environment, FrameStack, Info, Step};

#[derive(TryFromPrimitive, IntoPrimitive, EnumIter, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Action {
    Left = 0,
    Stay = 1,
    Right = 2,
}

#[derive(Config, Debug)]
pub struct CatchConfig {
    /// rendered frame height in pixels
    #[config(default = 84)]
    pub height: usize,

    /// rendered frame width in pixels
    #[config(default = 84)]
    pub width: usize,

    /// game board rows; the paddle lives on the last one
    #[config(default = 12)]
    pub rows: usize,

    #[config(default = 12)]
    pub columns: usize,

    /// number of stacked frames per observation
    #[config(default = 4)]
    pub frames: usize,

    /// balls dropped per episode
    #[config(default = 10)]
    pub balls: usize,

    /// truncate the episode after this many frames
    #[config(default = "None")]
    pub max_frames: Option<usize>,
}

impl CatchConfig {
    pub fn init(&self, seed: u64) -> Result<Catch> {
        ensure!(self.rows >= 2, "catch needs at least 2 rows, got {}", self.rows);
        ensure!(
            self.columns >= 3,
            "catch needs at least 3 columns, got {}",
            self.columns
        );
        ensure!(
            self.height >= self.rows && self.width >= self.columns,
            "frame {}x{} is smaller than the {}x{} board",
            self.height,
            self.width,
            self.rows,
            self.columns
        );
        ensure!(self.frames > 0, "at least one frame must be stacked");
        ensure!(self.balls > 0, "at least one ball must be dropped");

        Ok(Catch::new(self.clone(), seed))
    }
}

/// Balls fall one row per step; a three-cell paddle on the bottom row has to
/// catch them. +1 for a catch, -1 for a miss.
pub struct Catch {
    config: CatchConfig,
    rng: StdRng,
    stack: FrameStack,
    ball: (usize, usize),
    paddle: usize,
    balls_left: usize,
    frame: usize,
}

impl Catch {
    fn new(config: CatchConfig, seed: u64) -> Self {
        let stack = FrameStack::new(config.frames, config.height * config.width);

        Self {
            rng: StdRng::seed_from_u64(seed),
            stack,
            ball: (0, 0),
            paddle: config.columns / 2,
            balls_left: config.balls,
            frame: 0,
            config,
        }
    }

    pub fn ball(&self) -> (usize, usize) {
        self.ball
    }

    pub fn paddle(&self) -> usize {
        self.paddle
    }

    fn drop_ball(&mut self) {
        self.ball = (0, self.rng.random_range(0..self.config.columns));
    }

    fn move_paddle(&mut self, action: Action) {
        let last = self.config.columns - 2;

        self.paddle = match action {
            Action::Left => self.paddle.saturating_sub(1).max(1),
            Action::Stay => self.paddle,
            Action::Right => (self.paddle + 1).min(last),
        };
    }

    fn lit(&self, row: usize, column: usize) -> bool {
        let paddle = row == self.config.rows - 1 && column.abs_diff(self.paddle) <= 1;

        paddle || (row, column) == self.ball
    }

    fn render(&self) -> Vec<f32> {
        let CatchConfig {
            height,
            width,
            rows,
            columns,
            ..
        } = self.config;

        (0..height)
            .flat_map(|y| (0..width).map(move |x| (y * rows / height, x * columns / width)))
            .map(|(row, column)| self.lit(row, column) as u8 as f32)
            .collect()
    }
}

impl Environment for Catch {
    fn reset(&mut self) -> Vec<f32> {
        self.paddle = self.config.columns / 2;
        self.balls_left = self.config.balls;
        self.frame = 0;
        self.drop_ball();

        self.stack.reset(&self.render());
        self.stack.observation()
    }

    fn step(&mut self, action: usize) -> Step {
        let action = Action::try_from(action).unwrap_or_else(|_| {
            panic!(
                "action {action} is outside of 0..{}",
                Action::iter().len()
            )
        });

        self.move_paddle(action);
        self.ball.0 += 1;
        self.frame += 1;

        let mut reward = 0.0;
        if self.ball.0 == self.config.rows - 1 {
            reward = match self.ball.1.abs_diff(self.paddle) <= 1 {
                true => 1.0,
                false => -1.0,
            };

            self.balls_left -= 1;
            self.drop_ball();
        }

        let done = self.balls_left == 0;
        let truncated = !done
            && self
                .config
                .max_frames
                .is_some_and(|max_frames| self.frame >= max_frames);

        self.stack.push(&self.render());

        Step {
            observation: self.stack.observation(),
            reward,
            done,
            info: Info {
                truncated,
                frame: self.frame,
            },
        }
    }

    fn num_actions(&self) -> usize {
        Action::iter().len()
    }

    fn observation_shape(&self) -> [usize; 3] {
        [self.config.frames, self.config.height, self.config.width]
    }
}
