use std::collections::HashMap;

/// Scores free text on a [-1, 1] polarity scale.
pub trait SentimentProvider: Send + Sync {
    fn score(&self, text: &str) -> f64;

    /// Mean score over all texts, 0.0 for an empty list.
    fn aggregate(&self, texts: &[String]) -> f64 {
        if texts.is_empty() {
            return 0.0;
        }
        texts.iter().map(|t| self.score(t)).sum::<f64>() / texts.len() as f64
    }
}

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nobody", "nothing", "neither", "nor", "without", "cannot",
];

// Dampening applied to a negated term.
const NEGATION_SCALAR: f64 = -0.74;
// Normalisation constant of the compound score.
const ALPHA: f64 = 15.0;

const DEFAULT_LEXICON: &[(&str, f64)] = &[
    ("adoption", 1.5),
    ("all-time", 1.2),
    ("approval", 1.8),
    ("approved", 1.8),
    ("bull", 1.9),
    ("bullish", 2.3),
    ("boom", 2.0),
    ("breakout", 1.6),
    ("excited", 2.2),
    ("gain", 1.9),
    ("gains", 1.9),
    ("good", 1.9),
    ("great", 3.1),
    ("growth", 1.6),
    ("high", 0.8),
    ("optimism", 2.0),
    ("optimistic", 2.0),
    ("positive", 2.3),
    ("profit", 1.9),
    ("rally", 2.1),
    ("record", 1.0),
    ("recover", 1.6),
    ("recovery", 1.6),
    ("rise", 1.4),
    ("rises", 1.4),
    ("soar", 2.2),
    ("soars", 2.2),
    ("strong", 2.0),
    ("surge", 2.0),
    ("surges", 2.0),
    ("upgrade", 1.6),
    ("win", 2.8),
    ("ban", -2.6),
    ("banned", -2.6),
    ("bear", -1.7),
    ("bearish", -2.3),
    ("collapse", -3.0),
    ("crash", -3.0),
    ("crashes", -3.0),
    ("decline", -1.5),
    ("drop", -1.4),
    ("drops", -1.4),
    ("dump", -2.0),
    ("fear", -2.2),
    ("fraud", -3.0),
    ("hack", -2.6),
    ("hacked", -2.6),
    ("lawsuit", -2.0),
    ("loss", -2.0),
    ("losses", -2.0),
    ("low", -1.1),
    ("negative", -2.7),
    ("panic", -2.9),
    ("plunge", -2.6),
    ("plunges", -2.6),
    ("risk", -1.1),
    ("scam", -3.1),
    ("selloff", -2.1),
    ("slump", -2.2),
    ("warning", -1.4),
    ("weak", -1.9),
];

/// Word-lexicon polarity scorer with simple negation handling. The summed
/// valence is squashed with `s / sqrt(s² + 15)` into [-1, 1].
#[derive(Debug, Clone)]
pub struct LexiconSentiment {
    lexicon: HashMap<String, f64>,
}

impl Default for LexiconSentiment {
    fn default() -> Self {
        Self::with_lexicon(DEFAULT_LEXICON.iter().map(|(w, v)| (w.to_string(), *v)))
    }
}

impl LexiconSentiment {
    pub fn with_lexicon<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, f64)>,
    {
        Self {
            lexicon: entries
                .into_iter()
                .map(|(w, v)| (w.to_lowercase(), v))
                .collect(),
        }
    }

    fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
        text.split(|c: char| !(c.is_alphanumeric() || c == '\'' || c == '-'))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
    }

    fn is_negation(token: &str) -> bool {
        NEGATIONS.contains(&token) || token.ends_with("n't")
    }
}

impl SentimentProvider for LexiconSentiment {
    fn score(&self, text: &str) -> f64 {
        let mut sum = 0.0;
        let mut negate_next = false;

        for token in Self::tokens(text) {
            if Self::is_negation(&token) {
                negate_next = true;
                continue;
            }
            if let Some(valence) = self.lexicon.get(&token) {
                sum += if negate_next {
                    valence * NEGATION_SCALAR
                } else {
                    *valence
                };
            }
            negate_next = false;
        }

        if sum == 0.0 {
            return 0.0;
        }
        (sum / (sum * sum + ALPHA).sqrt()).clamp(-1.0, 1.0)
    }
}
