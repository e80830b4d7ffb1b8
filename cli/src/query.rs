use std::fs;
use std::path::PathBuf;

use clap::Args;

use gamesman::{games, Error, Manager, Result, TierPosition};

/// Parses a "tier:position" pair.
pub fn tier_position_from_str(s: &str) -> std::result::Result<TierPosition, String> {
    let (tier, position) = s
        .split_once(':')
        .ok_or_else(|| format!("\"{s}\" is not of the form tier:position"))?;
    let tier = tier.trim().parse().map_err(|_| format!("bad tier in \"{s}\""))?;
    let position = position
        .trim()
        .parse()
        .map_err(|_| format!("bad position in \"{s}\""))?;
    Ok(TierPosition::new(tier, position))
}

#[derive(Args, Debug)]
pub struct Query {
    game: String,
    variant: String,
    #[arg(value_parser = tier_position_from_str, help = "position as tier:position")]
    position: TierPosition,
    #[arg(long, default_value = "data")]
    data_path: PathBuf,
    #[arg(short, long, help = "write the JSON response here instead of stdout")]
    output: Option<PathBuf>,
}

impl Query {
    pub fn run(self) -> Result<()> {
        let game = games::find_game(&self.game, Some(&self.variant))?;
        if self.position.position < 0 || self.position.position >= game.tier_size(self.position.tier)
        {
            return Err(Error::InvalidArgument(format!(
                "position {} outside tier {}",
                self.position.position, self.position.tier
            )));
        }
        let manager = Manager::init(game, &self.data_path)?;
        let response = manager.query(self.position)?;
        let json = serde_json::to_string_pretty(&response)
            .map_err(|e| Error::Runtime(e.to_string()))?;
        match self.output {
            Some(path) => fs::write(path, json)?,
            None => println!("{json}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_position_parsing() {
        assert_eq!(
            tier_position_from_str("3:14").unwrap(),
            TierPosition::new(3, 14)
        );
        assert_eq!(
            tier_position_from_str(" 0 : 0 ").unwrap(),
            TierPosition::new(0, 0)
        );
        assert!(tier_position_from_str("14").is_err());
        assert!(tier_position_from_str("a:b").is_err());
    }
}
