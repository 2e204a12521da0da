//! Keyword scoring for weekly-report signals.
//!
//! Motivation and health scores are derived from weighted keyword counts in
//! report text: positive words raise the score, negative and risk words
//! lower it, bounded to 0..100. Thresholds then classify project risk.

use crate::types::RiskLevel;

/// Words that raise motivation and health scores.
pub const POSITIVE_WORDS: [&str; 5] = ["挑戦", "伸びしろ", "育成", "学び", "成長"];
/// Words that lower motivation and health scores.
pub const NEGATIVE_WORDS: [&str; 4] = ["疲労", "飽き", "燃え尽き", "限界"];
/// Words that mark interpersonal or reputational risk.
pub const RISK_WORDS: [&str; 4] = ["炎上", "対人トラブル", "噂", "不満"];

/// Total occurrences of any of the words in the text.
pub fn count_hits(text: &str, words: &[&str]) -> usize {
    words.iter().map(|word| text.matches(word).count()).sum()
}

fn hits_f(text: &str, words: &[&str]) -> f64 {
    f64::from(u32::try_from(count_hits(text, words)).unwrap_or(u32::MAX))
}

fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Per-user motivation score (0..100) and sentiment (-1..1) from report
/// text.
pub fn score_motivation(text: &str) -> (f64, f64) {
    let positive = hits_f(text, &POSITIVE_WORDS);
    let negative = hits_f(text, &NEGATIVE_WORDS);
    let score = clamp(60.0 + positive * 12.0 - negative * 20.0, 0.0, 100.0);
    let sentiment = clamp((positive - negative) / 4.0, -1.0, 1.0);
    (score, sentiment)
}

/// One-line Japanese summary of a user's motivation signals.
pub fn summarize_motivation(text: &str) -> &'static str {
    let positive = count_hits(text, &POSITIVE_WORDS);
    let negative = count_hits(text, &NEGATIVE_WORDS);
    if negative > positive {
        "負荷が高く、ケアが必要です。"
    } else if positive > 0 {
        "前向きな兆候があり、育成機会を活かせます。"
    } else {
        "安定傾向。"
    }
}

/// Per-project health score (0..100) and derived risk level.
///
/// Score ≤ 50 is `Critical`, ≤ 70 is `Warning`, anything above is `Safe`.
pub fn score_project_health(text: &str) -> (f64, RiskLevel) {
    let positive = hits_f(text, &POSITIVE_WORDS);
    let negative = hits_f(text, &NEGATIVE_WORDS);
    let risk = hits_f(text, &RISK_WORDS);
    let score = clamp(
        80.0 + positive * 8.0 - negative * 15.0 - risk * 10.0,
        0.0,
        100.0,
    );
    let level = if score <= 50.0 {
        RiskLevel::Critical
    } else if score <= 70.0 {
        RiskLevel::Warning
    } else {
        RiskLevel::Safe
    };
    (score, level)
}

/// Spread of member motivation: `(max − min) / 100`, 0 for a single member.
pub fn variance_score(values: &[f64]) -> f64 {
    if values.len() <= 1 {
        return 0.0;
    }
    let max = values.iter().copied().fold(f64::MIN, f64::max);
    let min = values.iter().copied().fold(f64::MAX, f64::min);
    round2((max - min) / 100.0)
}

/// Distance between the manager's motivation and the team average,
/// normalized: `|manager − avg| / 100`. A manager without a score counts as
/// sitting at the team average.
pub fn manager_gap_score(manager_motivation: Option<f64>, member_values: &[f64]) -> f64 {
    if member_values.is_empty() {
        return 0.0;
    }
    let count = f64::from(u32::try_from(member_values.len()).unwrap_or(u32::MAX));
    let team_avg = member_values.iter().sum::<f64>() / count;
    let manager = manager_motivation.unwrap_or(team_avg);
    round2((manager - team_avg).abs() / 100.0)
}

/// Assignment pattern ids derived from report keywords.
pub fn determine_pattern(notes: &str) -> &'static str {
    let lowered = notes.to_lowercase();
    if NEGATIVE_WORDS.iter().any(|word| notes.contains(word)) {
        return "burnout";
    }
    if ["対人トラブル", "噂", "炎上"]
        .iter()
        .any(|word| notes.contains(word))
    {
        return "toxic";
    }
    if ["伸びしろ", "挑戦", "育成"]
        .iter()
        .any(|word| notes.contains(word))
    {
        return "rising_star";
    }
    if notes.contains("顧問") || notes.contains("週1") {
        return "constraint";
    }
    if notes.contains("高単価") || lowered.contains("高額") {
        return "luxury";
    }
    "the_savior"
}

/// Hiring/assignment decision implied by a pattern.
pub fn decision_from_pattern(pattern_id: &str) -> &'static str {
    match pattern_id {
        "burnout" | "toxic" => "不採用",
        "rising_star" | "constraint" | "luxury" => "条件付採用",
        _ => "採用",
    }
}

/// The pattern vocabulary seeded into `assignment_patterns`.
pub fn pattern_definitions() -> [(&'static str, &'static str, &'static str); 6] {
    [
        ("the_savior", "全会一致", "All signals align"),
        ("burnout", "燃え尽き", "High burnout risk"),
        ("rising_star", "ダイヤの原石", "High growth potential"),
        ("luxury", "高嶺の花", "Over budget but strong"),
        ("toxic", "隠れ爆弾", "Team risk"),
        ("constraint", "制約あり", "Availability constraints"),
    ]
}

/// The three default strategy plans seeded per project.
pub fn default_plans() -> [(&'static str, &'static str, &'static str); 3] {
    [
        ("Plan_A", "現状維持で短期安定を確保する", "短期安定"),
        ("Plan_B", "人員配置を調整して成長機会を作る", "中期成長"),
        ("Plan_C", "コスト最適化で負荷を抑える", "短期利益"),
    ]
}

/// Plan recommended for a project: growth-oriented `Plan_B` when health is
/// at or below 60, otherwise steady-state `Plan_A`.
pub fn recommended_plan(health_score: f64) -> &'static str {
    if health_score <= 60.0 {
        "Plan_B"
    } else {
        "Plan_A"
    }
}
