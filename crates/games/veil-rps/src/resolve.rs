use serde::{Deserialize, Serialize};

/// A hand choice. Lizard and Spock are only legal in extended games.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Choice {
    Rock,
    Paper,
    Scissors,
    Lizard,
    Spock,
}

impl Choice {
    pub fn parse(s: &str, extended: bool) -> Option<Self> {
        let choice = match s.to_ascii_lowercase().as_str() {
            "rock" => Self::Rock,
            "paper" => Self::Paper,
            "scissors" => Self::Scissors,
            "lizard" => Self::Lizard,
            "spock" => Self::Spock,
            _ => return None,
        };
        if !extended && matches!(choice, Self::Lizard | Self::Spock) {
            return None;
        }
        Some(choice)
    }

    /// Canonical cycle: rock > scissors > paper > rock, extended with the
    /// lizard/spock edges.
    pub fn beats(&self, other: Choice) -> bool {
        matches!(
            (*self, other),
            (Self::Rock, Self::Scissors)
                | (Self::Rock, Self::Lizard)
                | (Self::Paper, Self::Rock)
                | (Self::Paper, Self::Spock)
                | (Self::Scissors, Self::Paper)
                | (Self::Scissors, Self::Lizard)
                | (Self::Lizard, Self::Spock)
                | (Self::Lizard, Self::Paper)
                | (Self::Spock, Self::Scissors)
                | (Self::Spock, Self::Rock),
        )
    }
}

/// Per-player tally for one battle-royale round. A missing choice loses
/// every comparison against a submitted one.
pub fn pairwise_tally(choices: &[Option<Choice>]) -> Vec<(u8, u8)> {
    let mut tally = vec![(0u8, 0u8); choices.len()];
    for i in 0..choices.len() {
        for j in (i + 1)..choices.len() {
            match (choices[i], choices[j]) {
                (Some(a), Some(b)) => {
                    if a.beats(b) {
                        tally[i].0 += 1;
                        tally[j].1 += 1;
                    } else if b.beats(a) {
                        tally[j].0 += 1;
                        tally[i].1 += 1;
                    }
                },
                (Some(_), None) => {
                    tally[i].0 += 1;
                    tally[j].1 += 1;
                },
                (None, Some(_)) => {
                    tally[j].0 += 1;
                    tally[i].1 += 1;
                },
                (None, None) => {},
            }
        }
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn canonical_cycle() {
        assert!(Choice::Rock.beats(Choice::Scissors));
        assert!(Choice::Scissors.beats(Choice::Paper));
        assert!(Choice::Paper.beats(Choice::Rock));
        assert!(!Choice::Rock.beats(Choice::Paper));
        assert!(!Choice::Rock.beats(Choice::Rock));
    }

    #[test]
    fn extended_edges() {
        assert!(Choice::Rock.beats(Choice::Lizard));
        assert!(Choice::Lizard.beats(Choice::Spock));
        assert!(Choice::Spock.beats(Choice::Rock));
        assert!(Choice::Lizard.beats(Choice::Paper));
        assert!(Choice::Spock.beats(Choice::Scissors));
    }

    #[test]
    fn parse_respects_extension() {
        assert_eq!(Choice::parse("ROCK", false), Some(Choice::Rock));
        assert_eq!(Choice::parse("lizard", false), None);
        assert_eq!(Choice::parse("lizard", true), Some(Choice::Lizard));
        assert_eq!(Choice::parse("well", true), None);
    }

    #[test]
    fn missing_choice_loses_every_comparison() {
        let tally = pairwise_tally(&[Some(Choice::Rock), None, Some(Choice::Rock)]);
        assert_eq!(tally[0], (1, 0));
        assert_eq!(tally[1], (0, 2));
        assert_eq!(tally[2], (1, 0));
    }

    proptest! {
        /// Exactly one of a.beats(b) / b.beats(a) holds for distinct choices.
        #[test]
        fn beats_is_a_tournament(a in 0usize..5, b in 0usize..5) {
            const ALL: [Choice; 5] = [
                Choice::Rock, Choice::Paper, Choice::Scissors, Choice::Lizard, Choice::Spock,
            ];
            let (ca, cb) = (ALL[a], ALL[b]);
            if ca == cb {
                prop_assert!(!ca.beats(cb) && !cb.beats(ca));
            } else {
                prop_assert!(ca.beats(cb) ^ cb.beats(ca));
            }
        }

        /// Wins and losses balance across any tally.
        #[test]
        fn tally_conserves_results(raw in proptest::collection::vec(0usize..6, 2..8)) {
            const ALL: [Choice; 5] = [
                Choice::Rock, Choice::Paper, Choice::Scissors, Choice::Lizard, Choice::Spock,
            ];
            let choices: Vec<Option<Choice>> =
                raw.iter().map(|&i| ALL.get(i).copied()).collect();
            let tally = pairwise_tally(&choices);
            let wins: u32 = tally.iter().map(|t| t.0 as u32).sum();
            let losses: u32 = tally.iter().map(|t| t.1 as u32).sum();
            prop_assert_eq!(wins, losses);
        }
    }
}
