//! Falling-glyph columns fed from a [`TokenSource`].
//!
//! A column that recycles takes one head token and keeps it for its whole
//! fall. Tail cells pull from the character stream every frame and fall back
//! to random glyphs, so a dry feed never stalls the animation.

use crate::tokens::TokenSource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

const MIN_TAIL: u16 = 4;
const MAX_SPEED: u8 = 3;
/// Fade floor so a tiny trail setting still produces a finite tail.
const MIN_FADE: f32 = 0.02;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Charset {
    Digits,
    Hex,
    #[default]
    Matrix,
}

impl Charset {
    pub fn glyphs(&self) -> Vec<char> {
        match self {
            Charset::Digits => ('0'..='9').collect(),
            Charset::Hex => ('0'..='9').chain('A'..='F').collect(),
            // half-width katakana plus digits
            Charset::Matrix => ('\u{FF66}'..='\u{FF9D}').chain('0'..='9').collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Head,
    Bright,
    Dim,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub x: u16,
    pub y: u16,
    pub ch: char,
    pub tone: Tone,
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone)]
struct Column {
    /// Row of the lowest head glyph; negative while above the screen.
    head_row: i32,
    speed: u8,
    countdown: u8,
    head: Vec<char>,
    recycle_pending: bool,
}

impl Column {
    fn pending() -> Self {
        Self {
            head_row: 0,
            speed: 1,
            countdown: 1,
            head: Vec::new(),
            recycle_pending: true,
        }
    }
}

pub struct RainField {
    width: u16,
    height: u16,
    tail: u16,
    columns: Vec<Column>,
    glyphs: Vec<char>,
    rng: StdRng,
    recycles: u64,
}

impl RainField {
    /// `trail` is the per-frame fade; the tail is as long as a glyph takes to
    /// fade out.
    pub fn new(width: u16, height: u16, charset: Charset, trail: f32, seed: u64) -> Self {
        let mut field = Self {
            width: 0,
            height: 0,
            tail: tail_len(trail),
            columns: Vec::new(),
            glyphs: charset.glyphs(),
            rng: StdRng::seed_from_u64(seed),
            recycles: 0,
        };
        field.resize(width, height);
        field
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Number of times a column has taken a new head.
    pub fn recycles(&self) -> u64 {
        self.recycles
    }

    pub fn set_charset(&mut self, charset: Charset) {
        self.glyphs = charset.glyphs();
    }

    pub fn set_trail(&mut self, trail: f32) {
        self.tail = tail_len(trail);
    }

    /// Existing columns keep their state; new ones start pending.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.columns.resize_with(width as usize, Column::pending);
    }

    fn random_glyph(&mut self) -> char {
        if self.glyphs.is_empty() {
            return '0';
        }
        let idx = self.rng.gen_range(0..self.glyphs.len());
        self.glyphs[idx]
    }

    fn recycle<S: TokenSource>(&mut self, idx: usize, src: &S) {
        let start = -(self.rng.gen_range(0..=self.height.max(1) as i32));
        let speed = self.rng.gen_range(1..=MAX_SPEED);
        let head = src
            .take_value_or_reuse()
            .map(|t| t.display().chars().collect())
            .unwrap_or_default();
        self.recycles += 1;

        let col = &mut self.columns[idx];
        col.head_row = start;
        col.speed = speed;
        col.countdown = speed;
        col.head = head;
        col.recycle_pending = false;
    }

    /// Advances every column one frame and returns what to draw.
    pub fn step<S: TokenSource>(&mut self, src: &S) -> Frame {
        let mut frame = Frame::default();
        let height = self.height as i32;
        let tail = self.tail as i32;

        for idx in 0..self.columns.len() {
            if self.columns[idx].recycle_pending {
                self.recycle(idx, src);
            }

            let col = &mut self.columns[idx];
            col.countdown = col.countdown.saturating_sub(1);
            if col.countdown == 0 {
                col.head_row += 1;
                col.countdown = col.speed;
            }

            let head_len = col.head.len().max(1) as i32;
            let top = col.head_row - head_len - tail + 1;
            if top >= height {
                col.recycle_pending = true;
                continue;
            }

            let x = idx as u16;
            let head_row = col.head_row;
            let head = col.head.clone();

            // head text reads top to bottom and ends on the head row
            for i in 0..head_len {
                let y = head_row - (head_len - 1 - i);
                if (0..height).contains(&y) {
                    let ch = match head.get(i as usize) {
                        Some(&c) => c,
                        None => self.random_glyph(),
                    };
                    frame.cells.push(Cell {
                        x,
                        y: y as u16,
                        ch,
                        tone: Tone::Head,
                    });
                }
            }

            let tail_bottom = head_row - head_len;
            for k in 0..tail {
                let y = tail_bottom - k;
                if !(0..height).contains(&y) {
                    continue;
                }
                let ch = match src.take_char() {
                    Some(c) => c,
                    None => self.random_glyph(),
                };
                let tone = if k < tail / 3 { Tone::Bright } else { Tone::Dim };
                frame.cells.push(Cell {
                    x,
                    y: y as u16,
                    ch,
                    tone,
                });
            }
        }
        frame
    }
}

fn tail_len(trail: f32) -> u16 {
    let fade = if trail.is_finite() { trail.max(MIN_FADE) } else { MIN_FADE };
    ((1.0 / fade).round() as u16).max(MIN_TAIL)
}
