use crate::{
    config::{LedLayout, MachineConfig},
    mapping::{map_to_index, map_value, round_up_to_hundred},
    types::{MachineAction, Rgb},
};

/// Live arc position for `power` against the running maximum.
///
/// `None` while no baseline has been observed, or while it rounds to zero.
pub fn compute_live_index(power: u32, baseline: Option<u32>, max_index: usize) -> Option<usize> {
    let ceiling = round_up_to_hundred(i64::from(baseline?));
    if ceiling == 0 {
        return None;
    }
    map_to_index(f64::from(power), 0.0, ceiling as f64, max_index)
}

pub fn compute_history_index(today_usage: f64, full_scale: f64, max_index: usize) -> usize {
    map_to_index(today_usage, 0.0, full_scale, max_index).unwrap_or(0)
}

/// Motor speed for normal operation; the minimum speed until a baseline exists.
pub fn compute_motor_speed(power: u32, baseline: Option<u32>, config: &MachineConfig) -> u8 {
    let min = config.min_motor_speed;
    let Some(baseline) = baseline else {
        return min;
    };
    let ceiling = round_up_to_hundred(i64::from(baseline)) as f64;
    map_value(
        f64::from(power),
        0.0,
        ceiling,
        f64::from(min),
        f64::from(config.max_motor_speed),
    )
    .filter(|speed| speed.is_finite())
    .map(|speed| speed.clamp(0.0, 100.0) as u8)
    .unwrap_or(min)
}

#[derive(Debug, Clone)]
pub struct DisplayController {
    live_index: Option<usize>,
    rendered_live_index: usize,
    history_index: usize,
    is_on: bool,
    blanked: bool,
}

impl DisplayController {
    pub fn new(is_on: bool) -> Self {
        Self {
            live_index: None,
            rendered_live_index: 0,
            history_index: 0,
            is_on,
            blanked: false,
        }
    }

    pub fn is_on(&self) -> bool {
        self.is_on
    }

    pub fn live_index(&self) -> Option<usize> {
        self.live_index
    }

    pub fn rendered_live_index(&self) -> usize {
        self.rendered_live_index
    }

    pub fn history_index(&self) -> usize {
        self.history_index
    }

    pub fn set_live_index(&mut self, index: Option<usize>) {
        self.live_index = index;
    }

    pub fn set_history_index(&mut self, index: usize, layout: &LedLayout) {
        self.history_index = index.min(layout.max_history_index());
    }

    /// Clears the ring on the first call while the display is disabled;
    /// later calls emit nothing.
    pub fn blank_once(&mut self) -> Vec<MachineAction> {
        if self.is_on || self.blanked {
            return Vec::new();
        }
        self.blanked = true;
        self.rendered_live_index = 0;
        vec![MachineAction::ClearPixels, MachineAction::ShowPixels]
    }

    /// Moves the rendered live arc one pixel toward the live index.
    pub fn step_live(&mut self, layout: &LedLayout) -> Vec<MachineAction> {
        if !self.is_on {
            return Vec::new();
        }

        let mut actions = vec![MachineAction::SetPixel {
            index: layout.centre,
            color: layout.centre_color,
        }];

        if let Some(target) = self.live_index.map(|index| index.min(layout.max_live_index)) {
            if target > self.rendered_live_index {
                self.rendered_live_index += 1;
                actions.push(MachineAction::SetPixel {
                    index: layout.centre + self.rendered_live_index,
                    color: layout.arc_color,
                });
            } else if target < self.rendered_live_index {
                actions.push(MachineAction::SetPixel {
                    index: layout.centre + self.rendered_live_index,
                    color: Rgb::OFF,
                });
                self.rendered_live_index -= 1;
            } else if self.rendered_live_index > 0 {
                actions.push(MachineAction::SetPixel {
                    index: layout.centre + self.rendered_live_index,
                    color: layout.arc_color,
                });
            }
        }

        actions.push(MachineAction::ShowPixels);
        actions
    }

    /// Redraws the history arc: blank below the centre, then `history_index`
    /// pixels downward from `centre - 1`.
    pub fn render_history(&self, layout: &LedLayout) -> Vec<MachineAction> {
        if !self.is_on {
            return Vec::new();
        }
        let mut actions = Vec::with_capacity(layout.centre + self.history_index + 1);
        actions.extend((0..layout.centre).map(|index| MachineAction::SetPixel {
            index,
            color: Rgb::OFF,
        }));
        actions.extend(self.history_pixels(layout));
        actions.push(MachineAction::ShowPixels);
        actions
    }

    /// Ring state after a saving episode: cleared, live sweep restarted,
    /// history arc redrawn.
    pub fn reset_after_episode(&mut self, layout: &LedLayout) -> Vec<MachineAction> {
        self.rendered_live_index = 0;
        let mut actions = vec![MachineAction::ClearPixels];
        if self.is_on {
            actions.extend(self.history_pixels(layout));
        }
        actions.push(MachineAction::ShowPixels);
        actions
    }

    fn history_pixels<'a>(&self, layout: &'a LedLayout) -> impl Iterator<Item = MachineAction> + 'a {
        let count = self.history_index.min(layout.max_history_index());
        let top = layout.centre;
        (0..count).map(move |offset| MachineAction::SetPixel {
            index: top - 1 - offset,
            color: layout.arc_color,
        })
    }
}
