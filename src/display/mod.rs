// Display compositing.
// The core mutates a logical monochrome matrix and an icon row through HAL
// callbacks; render() maps both onto an RGBA framebuffer, redrawing the full
// frame but only when something is flagged dirty. The driving loop calls
// render() at a fixed cadence, never per mutation.

mod font;

use crate::constants::lcd;

use font::{
    glyph,
    GLYPH_HEIGHT,
    GLYPH_WIDTH
};

// One matrix pixel becomes a PIXEL_SIZE square in the framebuffer.
pub const PIXEL_SIZE: usize = 4;

pub const ICON_ROW_HEIGHT: usize = 16;
pub const NOTICE_ROW_HEIGHT: usize = 16;

pub const FRAME_WIDTH: usize  = lcd::WIDTH * PIXEL_SIZE;
pub const FRAME_HEIGHT: usize = ICON_ROW_HEIGHT + lcd::HEIGHT * PIXEL_SIZE + NOTICE_ROW_HEIGHT;

// Size of the framebuffer in bytes (R8G8B8A8 format).
pub const FRAME_BUFFER_SIZE: usize = FRAME_WIDTH * FRAME_HEIGHT * 4;

// How many rendered frames a transient notice stays up.
const NOTICE_FRAMES: u8 = 30;

const BG: [u8; 4]         = [0xC5, 0xCC, 0xB8, 0xFF];   // unlit LCD
const INK: [u8; 4]        = [0x12, 0x16, 0x10, 0xFF];
const ICON_DIM: [u8; 4]   = [0x8E, 0x96, 0x84, 0xFF];
const OVERLAY_BG: [u8; 4] = [0x20, 0x28, 0x20, 0xFF];
const OVERLAY_FG: [u8; 4] = [0xE8, 0xF0, 0xE0, 0xFF];
const HALT_BG: [u8; 4]    = [0x88, 0x10, 0x10, 0xFF];

// Modal screens that replace the matrix content entirely.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Overlay {
    None,
    Pause { volume: u8 },
    Help,
    Halt
}

pub struct DisplayCompositor {
    matrix:     [[bool; lcd::WIDTH]; lcd::HEIGHT],
    icons:      [bool; lcd::ICON_COUNT],

    overlay:    Overlay,
    notice:     Option<(&'static str, u8)>,

    dirty:      bool,
    fb:         Box<[u8]>,
}

impl DisplayCompositor {
    pub fn new() -> Self {
        DisplayCompositor {
            matrix:     [[false; lcd::WIDTH]; lcd::HEIGHT],
            icons:      [false; lcd::ICON_COUNT],

            overlay:    Overlay::None,
            notice:     None,

            dirty:      true,
            fb:         vec![0; FRAME_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    // Core-driven callback. Out-of-range coordinates are ignored.
    pub fn set_pixel(&mut self, x: u8, y: u8, val: bool) {
        if (x as usize) < lcd::WIDTH && (y as usize) < lcd::HEIGHT {
            self.matrix[y as usize][x as usize] = val;
            self.dirty = true;
        }
    }

    // Core-driven callback. Out-of-range icons are ignored.
    pub fn set_icon(&mut self, icon: u8, val: bool) {
        if (icon as usize) < lcd::ICON_COUNT {
            self.icons[icon as usize] = val;
            self.dirty = true;
        }
    }

    pub fn pixel(&self, x: u8, y: u8) -> bool {
        if (x as usize) < lcd::WIDTH && (y as usize) < lcd::HEIGHT {
            self.matrix[y as usize][x as usize]
        } else {
            false
        }
    }

    pub fn icon(&self, icon: u8) -> bool {
        (icon as usize) < lcd::ICON_COUNT && self.icons[icon as usize]
    }

    pub fn overlay(&self) -> Overlay {
        self.overlay
    }

    pub fn set_overlay(&mut self, overlay: Overlay) {
        if overlay != self.overlay {
            self.overlay = overlay;
            self.dirty = true;
        }
    }

    // The matrix image may be stale after an overlay; callers use this when
    // dismissing one.
    pub fn force_redraw(&mut self) {
        self.dirty = true;
    }

    // Show a transient banner for the next NOTICE_FRAMES frames.
    pub fn notice(&mut self, text: &'static str) {
        self.notice = Some((text, NOTICE_FRAMES));
        self.dirty = true;
    }

    // Redraw the framebuffer if anything changed since the last call.
    // Returns whether a physical redraw happened.
    pub fn render(&mut self) -> bool {
        if let Some((_, frames)) = self.notice.as_mut() {
            *frames -= 1;
            if *frames == 0 {
                self.notice = None;
            }
            self.dirty = true;
        }

        if !self.dirty {
            return false;
        }

        match self.overlay {
            Overlay::None            => self.draw_matrix(),
            Overlay::Pause { volume } => self.draw_pause(volume),
            Overlay::Help            => self.draw_help(),
            Overlay::Halt            => self.draw_halt(),
        }

        if let Some((text, _)) = self.notice {
            let y = FRAME_HEIGHT - NOTICE_ROW_HEIGHT;
            fill_rect(&mut self.fb, 0, y, FRAME_WIDTH, NOTICE_ROW_HEIGHT, OVERLAY_BG);
            draw_text(&mut self.fb, 4, y + 4, 1, text, OVERLAY_FG);
        }

        self.dirty = false;
        true
    }

    pub fn copy_to(&self, out: &mut [u8]) {
        out.copy_from_slice(&self.fb);
    }

    fn draw_matrix(&mut self) {
        fill_rect(&mut self.fb, 0, 0, FRAME_WIDTH, FRAME_HEIGHT, BG);

        // Icon row: a filled marker per lit icon, a dim one otherwise.
        for i in 0..lcd::ICON_COUNT {
            let cell = i * (FRAME_WIDTH / lcd::ICON_COUNT);
            let colour = if self.icons[i] { INK } else { ICON_DIM };
            fill_rect(&mut self.fb, cell + 4, 4, 8, 8, colour);
            if !self.icons[i] {
                fill_rect(&mut self.fb, cell + 5, 5, 6, 6, BG);
            }
        }

        for y in 0..lcd::HEIGHT {
            for x in 0..lcd::WIDTH {
                if self.matrix[y][x] {
                    fill_rect(
                        &mut self.fb,
                        x * PIXEL_SIZE,
                        ICON_ROW_HEIGHT + y * PIXEL_SIZE,
                        PIXEL_SIZE,
                        PIXEL_SIZE,
                        INK
                    );
                }
            }
        }
    }

    fn draw_pause(&mut self, volume: u8) {
        fill_rect(&mut self.fb, 0, 0, FRAME_WIDTH, FRAME_HEIGHT, OVERLAY_BG);
        draw_text(&mut self.fb, 28, 12, 2, "PAUSED", OVERLAY_FG);

        let vol = format!("VOL {}", volume);
        draw_text(&mut self.fb, 40, 40, 1, &vol, OVERLAY_FG);

        draw_text(&mut self.fb, 10, 60, 1, "H: HELP", OVERLAY_FG);
        draw_text(&mut self.fb, 10, 72, 1, "ANY KEY: RESUME", OVERLAY_FG);
    }

    fn draw_help(&mut self) {
        fill_rect(&mut self.fb, 0, 0, FRAME_WIDTH, FRAME_HEIGHT, OVERLAY_BG);
        draw_text(&mut self.fb, 40, 6, 2, "HELP", OVERLAY_FG);

        draw_text(&mut self.fb, 6, 28, 1, "ARROWS: PET BUTTONS", OVERLAY_FG);
        draw_text(&mut self.fb, 6, 40, 1, "S: SAVE STATE", OVERLAY_FG);
        draw_text(&mut self.fb, 6, 52, 1, "P: PAUSE", OVERLAY_FG);
        draw_text(&mut self.fb, 6, 64, 1, "VOL: LEFT-RIGHT", OVERLAY_FG);
        draw_text(&mut self.fb, 6, 80, 1, "ANY KEY CLOSES", OVERLAY_FG);
    }

    fn draw_halt(&mut self) {
        fill_rect(&mut self.fb, 0, 0, FRAME_WIDTH, FRAME_HEIGHT, HALT_BG);
        draw_text(&mut self.fb, 4, 40, 2, "CPU HALTED", OVERLAY_FG);
    }
}

fn fill_rect(fb: &mut [u8], x: usize, y: usize, w: usize, h: usize, colour: [u8; 4]) {
    for row in y..(y + h).min(FRAME_HEIGHT) {
        for col in x..(x + w).min(FRAME_WIDTH) {
            let offset = (row * FRAME_WIDTH + col) * 4;
            fb[offset..offset + 4].copy_from_slice(&colour);
        }
    }
}

fn draw_text(fb: &mut [u8], x: usize, y: usize, scale: usize, text: &str, colour: [u8; 4]) {
    let mut pen = x;
    for c in text.chars() {
        let cols = glyph(c);
        for (cx, col) in cols.iter().enumerate() {
            for cy in 0..GLYPH_HEIGHT {
                if test_bit!(col, cy) {
                    fill_rect(fb, pen + cx * scale, y + cy * scale, scale, scale, colour);
                }
            }
        }
        pen += (GLYPH_WIDTH + 1) * scale;
    }
}
