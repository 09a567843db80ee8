//! Task classifier: a pure, deterministic heuristic scorer.
//!
//! Implementers are free to swap in a learned classifier behind the same
//! interface; this one uses token/keyword/length signals only.

/// Scores in `[0, 1]` on each named axis, in the fixed order the rest of
/// the crate relies on (`AdapterConfig::task_affinities` uses the same
/// order so `taskFit` is a plain dot product).
pub const AXES: [&str; 7] = [
    "math",
    "code",
    "reasoning",
    "language_en",
    "language_other",
    "short",
    "long",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub math: f64,
    pub code: f64,
    pub reasoning: f64,
    pub language_en: f64,
    pub language_other: f64,
    pub short: f64,
    pub long: f64,
}

impl Classification {
    pub fn as_vector(&self) -> [f64; 7] {
        [
            self.math,
            self.code,
            self.reasoning,
            self.language_en,
            self.language_other,
            self.short,
            self.long,
        ]
    }

    pub fn dot(&self, affinities: &[f64; 7]) -> f64 {
        self.as_vector()
            .iter()
            .zip(affinities.iter())
            .map(|(a, b)| a * b)
            .sum()
    }
}

const MATH_SIGNALS: &[&str] = &[
    "integral", "derivative", "equation", "solve for", "theorem", "proof", "matrix",
    "polynomial", "calculate", "sum of",
];
const CODE_SIGNALS: &[&str] = &[
    "fn ", "function", "class ", "def ", "import ", "compile", "stack trace", "```", "regex",
    "refactor",
];
const REASONING_SIGNALS: &[&str] = &[
    "why", "explain", "because", "therefore", "step by step", "logically", "compare",
    "trade-off", "pros and cons",
];

const SHORT_WORD_THRESHOLD: usize = 12;
const LONG_WORD_THRESHOLD: usize = 200;

/// Classify a prompt. Deterministic for the same input string.
pub fn classify(prompt: &str) -> Classification {
    let lower = prompt.to_lowercase();
    let word_count = lower.split_whitespace().count().max(1);

    let math = axis_score(&lower, MATH_SIGNALS);
    let code = axis_score(&lower, CODE_SIGNALS);
    let reasoning = axis_score(&lower, REASONING_SIGNALS);

    let non_ascii = prompt.chars().filter(|c| !c.is_ascii()).count();
    let total_chars = prompt.chars().count().max(1);
    let non_ascii_ratio = non_ascii as f64 / total_chars as f64;
    let language_other = non_ascii_ratio.min(1.0);
    let language_en = 1.0 - language_other;

    let short = length_score(word_count, SHORT_WORD_THRESHOLD, true);
    let long = length_score(word_count, LONG_WORD_THRESHOLD, false);

    Classification {
        math,
        code,
        reasoning,
        language_en,
        language_other,
        short,
        long,
    }
}

fn axis_score(lower_prompt: &str, signals: &[&str]) -> f64 {
    let hits = signals.iter().filter(|s| lower_prompt.contains(*s)).count();
    (hits as f64 / 3.0).min(1.0)
}

fn length_score(word_count: usize, threshold: usize, below_is_high: bool) -> f64 {
    let ratio = word_count as f64 / threshold as f64;
    if below_is_high {
        (1.0 - ratio).clamp(0.0, 1.0)
    } else {
        (ratio - 1.0).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_deterministic() {
        let a = classify("Please solve for x in this equation: 2x + 3 = 7");
        let b = classify("Please solve for x in this equation: 2x + 3 = 7");
        assert_eq!(a, b);
    }

    #[test]
    fn math_prompt_scores_high_on_math_axis() {
        let c = classify("Solve for x: find the derivative of this polynomial equation");
        assert!(c.math > 0.5);
    }

    #[test]
    fn code_prompt_scores_high_on_code_axis() {
        let c = classify("```rust\nfn main() { compile this }\n```");
        assert!(c.code > 0.5);
    }

    #[test]
    fn short_prompt_scores_high_on_short_axis() {
        let c = classify("hi there");
        assert!(c.short > 0.5);
        assert_eq!(c.long, 0.0);
    }

    #[test]
    fn non_ascii_prompt_scores_on_language_other() {
        let c = classify("こんにちは世界、元気ですか");
        assert!(c.language_other > 0.5);
    }
}
