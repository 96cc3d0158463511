//! Class names and visualization palette.

use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// COCO category names indexed by model class id. `N/A` marks unused ids.
pub const COCO_CLASSES: [&str; 91] = [
    "N/A", "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "N/A", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "N/A", "backpack",
    "umbrella", "N/A", "N/A", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard",
    "sports ball", "kite", "baseball bat", "baseball glove", "skateboard", "surfboard",
    "tennis racket", "bottle", "N/A", "wine glass", "cup", "fork", "knife", "spoon", "bowl",
    "banana", "apple", "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut",
    "cake", "chair", "couch", "potted plant", "bed", "N/A", "dining table", "N/A", "N/A",
    "toilet", "N/A", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone", "microwave",
    "oven", "toaster", "sink", "refrigerator", "N/A", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// Box colors, cycled by detection index.
pub const PALETTE: [[u8; 3]; 6] = [
    [0, 114, 189],
    [217, 83, 25],
    [237, 177, 32],
    [126, 47, 142],
    [119, 172, 48],
    [77, 190, 238],
];

pub fn palette_color(index: usize) -> [u8; 3] {
    PALETTE[index % PALETTE.len()]
}

#[derive(Clone, Debug)]
pub struct Labels {
    names: Vec<String>,
}

impl Default for Labels {
    fn default() -> Self {
        Self::coco()
    }
}

impl Labels {
    pub fn coco() -> Self {
        Self {
            names: COCO_CLASSES.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// One label per line; blank lines are kept as `N/A` so ids stay aligned.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {}", path.display()))?;
        let names: Vec<String> = raw
            .lines()
            .map(|line| match line.trim() {
                "" => "N/A".to_string(),
                name => name.to_string(),
            })
            .collect();
        if names.is_empty() {
            return Err(anyhow!("labels file {} is empty", path.display()));
        }
        Ok(Self { names })
    }

    pub fn name(&self, class_id: usize) -> String {
        self.names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class {class_id}"))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn coco_ids_line_up() {
        let labels = Labels::coco();
        assert_eq!(labels.name(1), "person");
        assert_eq!(labels.name(3), "car");
        assert_eq!(labels.name(12), "N/A");
        assert_eq!(labels.name(90), "toothbrush");
        assert_eq!(labels.name(91), "class 91");
    }

    #[test]
    fn palette_cycles() {
        assert_eq!(palette_color(0), palette_color(6));
        assert_ne!(palette_color(0), palette_color(1));
    }

    #[test]
    fn labels_file_keeps_blank_slots() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "background")?;
        writeln!(file)?;
        writeln!(file, "widget")?;
        let labels = Labels::from_file(file.path())?;
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.name(1), "N/A");
        assert_eq!(labels.name(2), "widget");
        Ok(())
    }
}
