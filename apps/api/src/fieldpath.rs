//! Dotted/bracketed field-path addressing into `cv_data` (§4.1
//! `update_field`, §9 Design Notes). A path like `work_experience[0].bullets[1]`
//! or `contact.email` resolves through a JSON projection of [`CvData`] and
//! replaces the addressed value wholesale — there is no deep-merge, matching
//! §4.1's contract literally.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

fn parse_path(path: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    for dotted in path.split('.') {
        if dotted.is_empty() {
            return Err(format!("empty path segment in '{path}'"));
        }
        let mut rest = dotted;
        // Leading key before any `[`.
        if let Some(bracket_pos) = rest.find('[') {
            let key = &rest[..bracket_pos];
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            rest = &rest[bracket_pos..];
            while let Some(stripped) = rest.strip_prefix('[') {
                let close = stripped.find(']').ok_or_else(|| format!("unclosed '[' in path '{path}'"))?;
                let idx_str = &stripped[..close];
                let idx: usize = idx_str.parse().map_err(|_| format!("invalid array index '{idx_str}' in path '{path}'"))?;
                segments.push(Segment::Index(idx));
                rest = &stripped[close + 1..];
            }
            if !rest.is_empty() {
                return Err(format!("trailing garbage '{rest}' in path '{path}'"));
            }
        } else {
            segments.push(Segment::Key(rest.to_string()));
        }
    }
    if segments.is_empty() {
        return Err(format!("path '{path}' resolved to no segments"));
    }
    Ok(segments)
}

/// Applies `value` at `path` within `root`, wholesale-replacing whatever was
/// there (creating intermediate objects/array slots as needed). Array
/// indices must address an existing slot or the next free one (`len`); any
/// larger index is an error rather than silently padding with nulls.
pub fn apply_field_path(root: &mut Value, path: &str, value: Value) -> Result<(), String> {
    let segments = parse_path(path)?;
    set_recursive(root, &segments, value)
}

fn set_recursive(current: &mut Value, segments: &[Segment], value: Value) -> Result<(), String> {
    let (head, tail) = segments.split_first().expect("segments is non-empty by construction");

    if tail.is_empty() {
        assign(current, head, value)
    } else {
        let next = navigate_or_create(current, head)?;
        set_recursive(next, tail, value)
    }
}

fn assign(current: &mut Value, segment: &Segment, value: Value) -> Result<(), String> {
    match segment {
        Segment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(Default::default());
            }
            current.as_object_mut().unwrap().insert(key.clone(), value);
            Ok(())
        }
        Segment::Index(idx) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let arr = current.as_array_mut().unwrap();
            if *idx < arr.len() {
                arr[*idx] = value;
            } else if *idx == arr.len() {
                arr.push(value);
            } else {
                return Err(format!("array index {idx} out of bounds (len {})", arr.len()));
            }
            Ok(())
        }
    }
}

fn navigate_or_create<'a>(current: &'a mut Value, segment: &Segment) -> Result<&'a mut Value, String> {
    match segment {
        Segment::Key(key) => {
            if !current.is_object() {
                *current = Value::Object(Default::default());
            }
            Ok(current.as_object_mut().unwrap().entry(key.clone()).or_insert(Value::Null))
        }
        Segment::Index(idx) => {
            if !current.is_array() {
                *current = Value::Array(Vec::new());
            }
            let arr = current.as_array_mut().unwrap();
            if *idx > arr.len() {
                return Err(format!("array index {idx} out of bounds (len {})", arr.len()));
            }
            if *idx == arr.len() {
                arr.push(Value::Null);
            }
            Ok(&mut arr[*idx])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sets_a_top_level_scalar_field() {
        let mut root = json!({"full_name": "Old Name"});
        apply_field_path(&mut root, "full_name", json!("New Name")).unwrap();
        assert_eq!(root["full_name"], "New Name");
    }

    #[test]
    fn sets_an_array_element_by_index() {
        let mut root = json!({"work_experience": [{"title": "A"}, {"title": "B"}]});
        apply_field_path(&mut root, "work_experience[1].title", json!("Updated")).unwrap();
        assert_eq!(root["work_experience"][1]["title"], "Updated");
        assert_eq!(root["work_experience"][0]["title"], "A");
    }

    #[test]
    fn replaces_whole_bullets_array_wholesale() {
        let mut root = json!({"work_experience": [{"bullets": ["a", "b"]}]});
        apply_field_path(&mut root, "work_experience[0].bullets", json!(["only one now"])).unwrap();
        assert_eq!(root["work_experience"][0]["bullets"], json!(["only one now"]));
    }

    #[test]
    fn appends_one_past_the_end() {
        let mut root = json!({"languages": ["English"]});
        apply_field_path(&mut root, "languages[1]", json!("German")).unwrap();
        assert_eq!(root["languages"], json!(["English", "German"]));
    }

    #[test]
    fn rejects_index_beyond_next_free_slot() {
        let mut root = json!({"languages": ["English"]});
        assert!(apply_field_path(&mut root, "languages[5]", json!("German")).is_err());
    }

    #[test]
    fn rejects_malformed_path() {
        let mut root = json!({});
        assert!(apply_field_path(&mut root, "work_experience[0", json!("x")).is_err());
    }

    #[test]
    fn nested_bullet_index_creates_intermediate_objects() {
        let mut root = json!({});
        apply_field_path(&mut root, "work_experience[0].bullets[0]", json!("first bullet")).unwrap();
        assert_eq!(root["work_experience"][0]["bullets"][0], "first bullet");
    }
}
