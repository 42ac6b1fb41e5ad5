use super::state::AppState;
use crossterm::{
    cursor::MoveTo,
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use matrix_rain::feed::StatusLevel;
use matrix_rain::rain::{Frame, Tone};
use std::collections::HashSet;
use std::io::{self, Write};

fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Head => Color::White,
        Tone::Bright => Color::Green,
        Tone::Dim => Color::DarkGreen,
    }
}

fn level_color(level: StatusLevel) -> Color {
    match level {
        StatusLevel::Info => Color::Grey,
        StatusLevel::Warn => Color::Yellow,
        StatusLevel::Error => Color::Red,
    }
}

/// Draws frames as diffs against the previous one so unchanged screen
/// regions are not cleared every tick.
#[derive(Default)]
pub struct Screen {
    drawn: HashSet<(u16, u16)>,
}

impl Screen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.drawn.clear();
        queue!(out, ResetColor, Clear(ClearType::All))
    }

    pub fn draw<W: Write>(&mut self, out: &mut W, frame: &Frame) -> io::Result<()> {
        let next: HashSet<(u16, u16)> = frame.cells.iter().map(|c| (c.x, c.y)).collect();
        for &(x, y) in self.drawn.difference(&next) {
            queue!(out, MoveTo(x, y), Print(' '))?;
        }
        let mut color = None;
        for cell in &frame.cells {
            let want = tone_color(cell.tone);
            if color != Some(want) {
                queue!(out, SetForegroundColor(want))?;
                color = Some(want);
            }
            queue!(out, MoveTo(cell.x, cell.y), Print(cell.ch))?;
        }
        self.drawn = next;
        Ok(())
    }

    pub fn draw_status<W: Write>(
        &self,
        out: &mut W,
        state: &AppState,
        row: u16,
        width: u16,
    ) -> io::Result<()> {
        let line = state.status_line(width as usize);
        queue!(
            out,
            MoveTo(0, row),
            Clear(ClearType::CurrentLine),
            SetForegroundColor(level_color(state.level)),
            Print(&line),
            ResetColor
        )
    }
}
