pub mod event;
pub mod reducer;
pub mod render;
pub mod state;

pub use event::*;
pub use state::*;

use matrix_rain::tokens::BufferDepth;

pub struct AppRuntime {
    pub state: AppState,
    dirty: bool,
    last_tick_unix: u64,
}

impl AppRuntime {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            dirty: true,
            last_tick_unix: 0,
        }
    }

    pub fn handle_event(&mut self, ev: AppEvent) {
        if reducer::reduce(&mut self.state, ev) {
            self.dirty = true;
        }
    }

    pub fn tick_if_needed(&mut self, depth: BufferDepth) {
        let now = now_unix();
        if now != self.last_tick_unix {
            self.last_tick_unix = now;
            self.handle_event(AppEvent::Timer(TimerEvent::Tick1s { now_unix: now, depth }));
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// True once after any state change.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}
