use clap::Args;
use rand::seq::SliceRandom;
use rand::Rng;

use gamesman::{games, Error, Game, Result, Tier, TierPosition};

#[derive(Args, Debug)]
pub struct GetRandom {
    game: String,
    variant: Option<String>,
}

/// All tiers reachable from the initial tier, canonical representatives
/// only.
fn reachable_tiers(game: &dyn Game) -> Vec<Tier> {
    let mut discovered = vec![game.canonical_tier(game.initial_tier())];
    let mut next = 0;
    while next < discovered.len() {
        let tier = discovered[next];
        next += 1;
        for child in game.child_tiers(tier) {
            let child = game.canonical_tier(child);
            if child != tier && !discovered.contains(&child) {
                discovered.push(child);
            }
        }
    }
    discovered
}

impl GetRandom {
    pub fn run(self) -> Result<()> {
        let game = games::find_game(&self.game, self.variant.as_deref())?;
        let tiers = reachable_tiers(game.as_ref());
        let mut rng = rand::thread_rng();
        // rejection-sample a legal position
        for _ in 0..100_000 {
            let tier = *tiers
                .choose(&mut rng)
                .unwrap_or_else(|| unreachable!("the initial tier always exists"));
            let size = game.tier_size(tier);
            if size == 0 {
                continue;
            }
            let tier_position = TierPosition::new(tier, rng.gen_range(0..size));
            if game.is_legal_position(tier_position) {
                println!("{tier_position}");
                return Ok(());
            }
        }
        Err(Error::Runtime(
            "could not sample a legal position; the game's legality filter \
             may be too tight"
                .into(),
        ))
    }
}
