use anyhow::{Context, Result, anyhow, bail};
use glam::IVec2;
use tilesync::EntityKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Move(IVec2),
    Spawn(EntityKind, IVec2),
    Sign(IVec2, String),
    Remove(IVec2),
    Who,
    Look(IVec2),
    Quit,
    Chat(String),
}

pub const HELP: &str = "/move dx dy | /spawn <crate|boulder|wall> x y | /sign x y text | \
                        /remove x y | /who | /look x y | /quit | anything else is chat";

impl Command {
    /// Parses one line of terminal input. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Self::Chat(line.to_string())));
        };

        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let command = match name {
            "move" | "m" => Self::Move(parse_vec(&mut words)?),
            "spawn" => {
                let kind_name = words.next().ok_or_else(|| anyhow!("missing kind"))?;
                let kind = EntityKind::from_name(kind_name)
                    .ok_or_else(|| anyhow!("unknown kind '{}'", kind_name))?;
                Self::Spawn(kind, parse_vec(&mut words)?)
            }
            "sign" => {
                let position = parse_vec(&mut words)?;
                let text = words.collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    bail!("a sign needs some text");
                }
                Self::Sign(position, text)
            }
            "remove" | "rm" => Self::Remove(parse_vec(&mut words)?),
            "who" => Self::Who,
            "look" => Self::Look(parse_vec(&mut words)?),
            "quit" | "q" => Self::Quit,
            other => bail!("unknown command '/{}' ({})", other, HELP),
        };
        Ok(Some(command))
    }
}

fn parse_vec<'a>(words: &mut impl Iterator<Item = &'a str>) -> Result<IVec2> {
    let mut coordinate = |axis: &str| -> Result<i32> {
        let word = words
            .next()
            .ok_or_else(|| anyhow!("missing {} coordinate", axis))?;
        word.parse()
            .with_context(|| format!("bad {} coordinate '{}'", axis, word))
    };
    let x = coordinate("x")?;
    let y = coordinate("y")?;
    Ok(IVec2::new(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_commands() {
        assert_eq!(
            Command::parse("/move 1 -1").unwrap(),
            Some(Command::Move(IVec2::new(1, -1)))
        );
        assert_eq!(
            Command::parse("/spawn Boulder 3 4").unwrap(),
            Some(Command::Spawn(EntityKind::Boulder, IVec2::new(3, 4)))
        );
        assert_eq!(
            Command::parse("/sign 0 -2 mind   the gap").unwrap(),
            Some(Command::Sign(IVec2::new(0, -2), "mind the gap".into()))
        );
        assert_eq!(Command::parse("/quit").unwrap(), Some(Command::Quit));
        assert_eq!(Command::parse("   ").unwrap(), None);
    }

    #[test]
    fn test_plain_text_is_chat() {
        assert_eq!(
            Command::parse("hello /there").unwrap(),
            Some(Command::Chat("hello /there".into()))
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(Command::parse("/move 1").is_err());
        assert!(Command::parse("/move x 1").is_err());
        assert!(Command::parse("/spawn dragon 0 0").is_err());
        assert!(Command::parse("/sign 1 1").is_err());
        assert!(Command::parse("/dance").is_err());
    }
}
