//! Graphics decoder: the `# Detected Graphics` section → [`DetectedGraphic`]s.
//!
//! The section body should be a bare JSON array of
//! `{"box_2d": [ymin, xmin, ymax, xmax], "label": "...", "page_index": 0}`.
//! In practice it arrives fenced, wrapped in prose, or truncated. Decoding is
//! therefore total: anything that cannot be read yields "no graphics", and a
//! bad entry is dropped without affecting its siblings.

use crate::document::{BoundingBox, DetectedGraphic};
use serde_json::Value;
use tracing::{debug, warn};

/// Decode the raw graphics section into validated graphics.
///
/// Returns an empty list when the text holds no parseable JSON array.
pub fn decode_graphics(raw: &str) -> Vec<DetectedGraphic> {
    decode_indexed(raw).into_iter().map(|(_, g)| g).collect()
}

/// Like [`decode_graphics`], but pairs every graphic with its position in the
/// model's array. Positions of dropped entries are skipped, so ids derived
/// from them stay stable when a sibling is malformed.
pub fn decode_indexed(raw: &str) -> Vec<(usize, DetectedGraphic)> {
    let Some(array_text) = locate_array(raw) else {
        if !raw.trim().is_empty() {
            debug!("Graphics section has no JSON array: {:?}", truncate(raw, 80));
        }
        return Vec::new();
    };

    let entries: Vec<Value> = match serde_json::from_str(&array_text) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to parse graphics JSON: {}", e);
            return Vec::new();
        }
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let graphic = decode_entry(idx, entry);
            if graphic.is_none() {
                debug!("Dropping graphics entry {}: no valid box", idx);
            }
            graphic.map(|g| (idx, g))
        })
        .collect()
}

/// Strip code fences and return the text from the first `[` to the last `]`.
fn locate_array(raw: &str) -> Option<String> {
    let unfenced = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let start = unfenced.find('[')?;
    let end = unfenced.rfind(']')?;
    (end > start).then(|| unfenced[start..=end].to_string())
}

fn decode_entry(idx: usize, entry: &Value) -> Option<DetectedGraphic> {
    let obj = entry.as_object()?;
    let bbox = obj
        .get("box_2d")
        .or_else(|| obj.get("box"))
        .and_then(decode_box)?;

    let label = obj
        .get("label")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Graphic {}", idx + 1));

    let page_index = obj
        .get("page_index")
        .and_then(decode_index)
        .unwrap_or(0);

    Some(DetectedGraphic {
        bbox,
        label,
        page_index,
    })
}

/// Exactly four finite numbers, rounded to integers.
fn decode_box(value: &Value) -> Option<BoundingBox> {
    let items = value.as_array()?;
    if items.len() != 4 {
        return None;
    }
    let mut coords = [0i32; 4];
    for (slot, item) in coords.iter_mut().zip(items) {
        let n = item.as_f64().filter(|n| n.is_finite())?;
        *slot = n.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
    }
    Some(BoundingBox(coords))
}

fn decode_index(value: &Value) -> Option<usize> {
    value.as_u64().map(|n| n as usize).or_else(|| {
        value
            .as_f64()
            .filter(|n| n.is_finite() && *n >= 0.0 && n.fract() == 0.0)
            .map(|n| n as usize)
    })
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_json_decodes() {
        let raw = "```json\n[{\"box_2d\":[10,10,200,200],\"label\":\"Chart\",\"page_index\":0}]\n```";
        let g = decode_graphics(raw);
        assert_eq!(g.len(), 1);
        assert_eq!(g[0].bbox, BoundingBox::new(10, 10, 200, 200));
        assert_eq!(g[0].label, "Chart");
        assert_eq!(g[0].page_index, 0);
    }

    #[test]
    fn prose_without_array_is_empty() {
        assert!(decode_graphics("no graphics found").is_empty());
        assert!(decode_graphics("").is_empty());
        assert!(decode_graphics("None").is_empty());
    }

    #[test]
    fn surrounding_prose_is_tolerated() {
        let raw = "Here are the graphics:\n[{\"box_2d\":[0,0,500,500],\"label\":\"Bar chart\"}]\nHope this helps.";
        let g = decode_graphics(raw);
        assert_eq!(g.len(), 1);
        assert_eq!(g[0].label, "Bar chart");
    }

    #[test]
    fn malformed_json_is_empty() {
        assert!(decode_graphics("[{\"box_2d\":[1,2,3,4], \"label\": }]").is_empty());
        assert!(decode_graphics("] before [").is_empty());
        // Truncated mid-stream: no closing bracket
        assert!(decode_graphics("[{\"box_2d\":[1,2,3").is_empty());
    }

    #[test]
    fn bad_entries_are_dropped_individually() {
        let raw = r#"[
            {"box_2d":[1,2,3,4],"label":"ok"},
            {"label":"no box"},
            {"box_2d":[1,2,3],"label":"short box"},
            {"box_2d":[1,"a",3,4],"label":"text coord"},
            "not an object",
            {"box_2d":[5,6,7,8]}
        ]"#;
        let g = decode_indexed(raw);
        assert_eq!(g.len(), 2);
        assert_eq!(g[0].0, 0);
        assert_eq!(g[0].1.label, "ok");
        assert_eq!(g[1].0, 5);
        assert_eq!(g[1].1.label, "Graphic 6");
    }

    #[test]
    fn page_index_defaults_and_coercions() {
        let raw = r#"[
            {"box_2d":[0,0,1,1],"page_index":"2"},
            {"box_2d":[0,0,1,1],"page_index":-1},
            {"box_2d":[0,0,1,1],"page_index":2.0},
            {"box_2d":[0,0,1,1],"page_index":3}
        ]"#;
        let idx: Vec<usize> = decode_graphics(raw).iter().map(|g| g.page_index).collect();
        assert_eq!(idx, vec![0, 0, 2, 3]);
    }

    #[test]
    fn fractional_coordinates_are_rounded() {
        let g = decode_graphics("[{\"box\":[10.4,10.6,99.5,100]}]");
        assert_eq!(g[0].bbox, BoundingBox::new(10, 11, 100, 100));
    }

    #[test]
    fn empty_array() {
        assert!(decode_graphics("[]").is_empty());
    }
}
