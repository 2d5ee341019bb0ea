use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DisplayError, StateError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StimulusType {
    Circle {
        radius: f32,
        color: [u8; 4],
    },
    Rectangle {
        width: f32,
        height: f32,
        color: [u8; 4],
    },
    Arrow {
        direction: ArrowDirection,
        size: f32,
        color: [u8; 4],
    },
    Cross {
        size: f32,
        thickness: f32,
        color: [u8; 4],
    },
    Text {
        content: String,
        size: f32,
        color: [u8; 4],
    },
}

impl StimulusType {
    pub fn text(content: impl Into<String>) -> Self {
        StimulusType::Text {
            content: content.into(),
            size: 32.0,
            color: [255, 255, 255, 255],
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, StimulusType::Text { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrowDirection {
    Up,
    Down,
    Left,
    Right,
}

/// A drawable, its position in pixels relative to the screen centre, and its visibility.
#[derive(Debug, Clone, PartialEq)]
pub struct Stimulus {
    pub shape: StimulusType,
    pub position: (f32, f32),
    pub visible: bool,
}

/// Stimuli of the graphics loop. Insertion order is render order.
#[derive(Debug, Clone, Default)]
pub struct StimulusSet {
    entries: Vec<(String, Stimulus)>,
    index: HashMap<String, usize>,
}

impl StimulusSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a hidden stimulus. Re-inserting a name replaces the shape in place.
    pub fn insert(&mut self, name: impl Into<String>, shape: StimulusType, position: (f32, f32)) {
        let name = name.into();
        if let Some(&i) = self.index.get(&name) {
            let entry = &mut self.entries[i].1;
            entry.shape = shape;
            entry.position = position;
            return;
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push((
            name,
            Stimulus {
                shape,
                position,
                visible: false,
            },
        ));
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut Stimulus, StateError> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.entries[i].1),
            None => Err(StateError::UnknownStimulus(name.to_string())),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Stimulus> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn show(&mut self, name: &str) -> Result<(), StateError> {
        self.entry_mut(name)?.visible = true;
        Ok(())
    }

    pub fn hide(&mut self, name: &str) -> Result<(), StateError> {
        self.entry_mut(name)?.visible = false;
        Ok(())
    }

    pub fn set_position(&mut self, name: &str, position: (f32, f32)) -> Result<(), StateError> {
        self.entry_mut(name)?.position = position;
        Ok(())
    }

    pub fn hide_all(&mut self) {
        for (_, s) in &mut self.entries {
            s.visible = false;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    pub fn visible(&self) -> impl Iterator<Item = (&str, &Stimulus)> {
        self.entries
            .iter()
            .filter(|(_, s)| s.visible)
            .map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Presentation surface driven by the graphics loop.
pub trait Display: Send {
    fn refresh_interval(&self) -> Duration;

    fn draw(&mut self, name: &str, stimulus: &Stimulus) -> Result<(), DisplayError>;

    /// Blocks until the frame is shown. Returns the duration of the frame.
    fn present(&mut self) -> Result<Duration, DisplayError>;
}
