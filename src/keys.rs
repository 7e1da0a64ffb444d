use crate::error::{CdpError, Result};

/// How a single keyboard key is spelled on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDefinition {
    pub key: String,
    pub code: String,
    pub key_code: i64,
}

/// A parsed `Key[+Mods]*` chord: the primary key plus the modifier bitmask
/// the `Input` domain expects (alt=1, ctrl=2, meta=4, shift=8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChord {
    pub definition: KeyDefinition,
    pub modifiers: i64,
}

impl KeyChord {
    /// Whether dispatching this chord should also emit a `char` event:
    /// a single printable character with no ctrl/alt/meta held.
    pub fn is_printable(&self) -> bool {
        self.definition.key.chars().count() == 1 && self.modifiers & (ALT | CTRL | META) == 0
    }
}

const ALT: i64 = 1;
const CTRL: i64 = 2;
const META: i64 = 4;
const SHIFT: i64 = 8;

/// Named keys with fixed wire spellings.
const NAMED_KEYS: [(&str, &str, &str, i64); 10] = [
    ("enter", "Enter", "Enter", 13),
    ("escape", "Escape", "Escape", 27),
    ("tab", "Tab", "Tab", 9),
    ("backspace", "Backspace", "Backspace", 8),
    ("arrowup", "ArrowUp", "ArrowUp", 38),
    ("arrowdown", "ArrowDown", "ArrowDown", 40),
    ("arrowleft", "ArrowLeft", "ArrowLeft", 37),
    ("arrowright", "ArrowRight", "ArrowRight", 39),
    ("space", " ", "Space", 32),
    (" ", " ", "Space", 32),
];

fn modifier_bit(token: &str) -> Option<i64> {
    match token.to_ascii_lowercase().as_str() {
        "control" | "ctrl" => Some(CTRL),
        "shift" => Some(SHIFT),
        "alt" => Some(ALT),
        "meta" | "command" | "cmd" => Some(META),
        _ => None,
    }
}

fn definition_for(key: &str) -> Result<KeyDefinition> {
    let lowered = key.to_ascii_lowercase();
    for (name, wire_key, code, key_code) in NAMED_KEYS {
        if lowered == name {
            return Ok(KeyDefinition {
                key: wire_key.to_string(),
                code: code.to_string(),
                key_code,
            });
        }
    }

    let mut chars = key.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => {
            let code = if c.is_ascii_digit() {
                format!("Digit{c}")
            } else {
                format!("Key{}", c.to_ascii_uppercase())
            };
            Ok(KeyDefinition {
                key: c.to_string(),
                code,
                key_code: c.to_ascii_uppercase() as i64,
            })
        }
        _ => Err(CdpError::msg(format!("unknown key: {key}"))),
    }
}

/// Parse a chord like `Enter`, `a`, `Control+a` or `ctrl+shift+ArrowDown`.
/// Every token but the last must be a modifier; the last is the primary key.
pub fn parse_chord(input: &str) -> Result<KeyChord> {
    let tokens: Vec<&str> = input.split('+').collect();
    let (key, mods) = match tokens.split_last() {
        Some((last, mods)) if !last.is_empty() => (*last, mods),
        // a trailing '+' means the primary key is '+' itself
        Some((_, mods)) if !mods.is_empty() => ("+", &mods[..mods.len() - 1]),
        _ => return Err(CdpError::msg(format!("empty key chord: {input:?}"))),
    };

    let mut modifiers = 0;
    for token in mods {
        let bit = modifier_bit(token)
            .ok_or_else(|| CdpError::msg(format!("unknown modifier: {token}")))?;
        modifiers |= bit;
    }

    Ok(KeyChord {
        definition: definition_for(key)?,
        modifiers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys() {
        let chord = parse_chord("Enter").unwrap();
        assert_eq!(chord.definition.key, "Enter");
        assert_eq!(chord.definition.code, "Enter");
        assert_eq!(chord.definition.key_code, 13);
        assert_eq!(chord.modifiers, 0);
        assert!(!chord.is_printable());

        let space = parse_chord("Space").unwrap();
        assert_eq!(space.definition.key, " ");
        assert_eq!(space.definition.code, "Space");
        assert!(space.is_printable());
    }

    #[test]
    fn single_characters() {
        let a = parse_chord("a").unwrap();
        assert_eq!(a.definition.code, "KeyA");
        assert_eq!(a.definition.key_code, 'A' as i64);
        assert!(a.is_printable());

        let seven = parse_chord("7").unwrap();
        assert_eq!(seven.definition.code, "Digit7");
    }

    #[test]
    fn modifier_bitmask() {
        assert_eq!(parse_chord("Control+a").unwrap().modifiers, 2);
        assert_eq!(parse_chord("alt+Tab").unwrap().modifiers, 1);
        assert_eq!(parse_chord("cmd+shift+z").unwrap().modifiers, 4 | 8);
        assert_eq!(
            parse_chord("ctrl+alt+meta+shift+x").unwrap().modifiers,
            1 | 2 | 4 | 8
        );
    }

    #[test]
    fn shift_alone_keeps_char_events() {
        // shift does not suppress the char event, the others do
        assert!(parse_chord("shift+a").unwrap().is_printable());
        assert!(!parse_chord("ctrl+a").unwrap().is_printable());
        assert!(!parse_chord("meta+a").unwrap().is_printable());
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_chord("").is_err());
        assert!(parse_chord("bogus+a").is_err());
        assert!(parse_chord("NotAKey").is_err());
    }
}
