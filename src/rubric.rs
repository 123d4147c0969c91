use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Academic,
    SocioEmotional,
    Career,
}

impl Domain {
    pub fn parse(raw: &str) -> Option<Domain> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "academic" => Some(Domain::Academic),
            "socioemotional" | "socio_emotional" | "socio-emotional" => {
                Some(Domain::SocioEmotional)
            }
            "career" => Some(Domain::Career),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Domain::Academic => "academic",
            Domain::SocioEmotional => "socioEmotional",
            Domain::Career => "career",
        }
    }

    /// Best-effort mapping from a counselor-authored category name to one of
    /// the fixed rubrics, used when a category carries no authored criteria.
    pub fn from_category_name(name: &str) -> Option<Domain> {
        let n = name.to_ascii_lowercase();
        if n.contains("academic") {
            Some(Domain::Academic)
        } else if n.contains("socio") || n.contains("emotional") {
            Some(Domain::SocioEmotional)
        } else if n.contains("career") {
            Some(Domain::Career)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreError {
    InvalidResponseValue,
    RubricNotFound,
}

impl ScoreError {
    pub fn code(self) -> &'static str {
        match self {
            ScoreError::InvalidResponseValue => "invalid_response",
            ScoreError::RubricNotFound => "rubric_not_found",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            ScoreError::InvalidResponseValue => "responses must be integers from 1 to 5",
            ScoreError::RubricNotFound => "no rubric band covers this score",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Band {
    pub min: f64,
    pub max: f64,
    pub label: &'static str,
    pub description: &'static str,
    pub suggestion: &'static str,
    pub color: &'static str,
}

pub static ACADEMIC_BANDS: [Band; 5] = [
    Band {
        min: 1.0,
        max: 1.99,
        label: "Very Low Academic Performance",
        description: "Struggles across most subjects and study habits are not yet established.",
        suggestion: "Schedule weekly counseling sessions and build a supervised study plan with the adviser.",
        color: "#dc2626",
    },
    Band {
        min: 2.0,
        max: 2.99,
        label: "Low Academic Performance",
        description: "Below the expected level in several subjects with inconsistent outputs.",
        suggestion: "Join peer tutoring and set small weekly goals reviewed with the counselor.",
        color: "#f97316",
    },
    Band {
        min: 3.0,
        max: 3.99,
        label: "Moderate Academic Performance",
        description: "Meets expectations in most subjects with room to grow in weaker areas.",
        suggestion: "Keep the current routine and add focused practice on the two weakest subjects.",
        color: "#eab308",
    },
    Band {
        min: 4.0,
        max: 4.49,
        label: "High Academic Performance",
        description: "Performs above expectations with steady, organized study habits.",
        suggestion: "Take on enrichment work or electives that stretch current strengths.",
        color: "#22c55e",
    },
    Band {
        min: 4.5,
        max: 5.0,
        label: "Very High Academic Performance",
        description: "Consistently excellent results across subjects.",
        suggestion: "Consider academic competitions, advanced coursework, or mentoring peers.",
        color: "#15803d",
    },
];

pub static SOCIO_EMOTIONAL_BANDS: [Band; 5] = [
    Band {
        min: 1.0,
        max: 1.99,
        label: "Depressed/Highly Anxious",
        description: "Reports persistent low mood or anxiety that interferes with daily school life.",
        suggestion: "Refer for immediate one-on-one counseling and coordinate with the guardian.",
        color: "#dc2626",
    },
    Band {
        min: 2.0,
        max: 2.99,
        label: "Stressed/Low",
        description: "Frequent stress with limited coping strategies.",
        suggestion: "Introduce stress-management techniques and schedule a follow-up session.",
        color: "#f97316",
    },
    Band {
        min: 3.0,
        max: 3.99,
        label: "Neutral/Stable",
        description: "Generally stable mood with occasional difficult days.",
        suggestion: "Maintain current supports and encourage participation in group activities.",
        color: "#eab308",
    },
    Band {
        min: 4.0,
        max: 4.49,
        label: "Well-balanced",
        description: "Manages pressure well and keeps healthy relationships.",
        suggestion: "Encourage continued involvement and peer-support roles.",
        color: "#22c55e",
    },
    Band {
        min: 4.5,
        max: 5.0,
        label: "Highly Resilient",
        description: "Strong coping skills and a consistently positive outlook.",
        suggestion: "Invite to peer-mentoring or student wellness programs.",
        color: "#15803d",
    },
];

pub static CAREER_BANDS: [Band; 5] = [
    Band {
        min: 1.0,
        max: 1.99,
        label: "Lack of Direction",
        description: "No identified interests or plans after graduation.",
        suggestion: "Start with interest inventories and one-on-one career exploration sessions.",
        color: "#dc2626",
    },
    Band {
        min: 2.0,
        max: 2.99,
        label: "Uncertain",
        description: "Some interests identified but no clear path between them.",
        suggestion: "Attend career talks and shadow at least one field of interest this term.",
        color: "#f97316",
    },
    Band {
        min: 3.0,
        max: 3.99,
        label: "Moderate Clarity",
        description: "A preferred direction exists though alternatives remain open.",
        suggestion: "Map course and strand choices against the preferred direction with the counselor.",
        color: "#eab308",
    },
    Band {
        min: 4.0,
        max: 4.49,
        label: "Clear Path",
        description: "A definite plan with realistic steps toward it.",
        suggestion: "Line up application requirements and a fallback option early.",
        color: "#22c55e",
    },
    Band {
        min: 4.5,
        max: 5.0,
        label: "Strong Focus",
        description: "A firm, well-researched plan the student is already acting on.",
        suggestion: "Connect with scholarship and internship opportunities in the chosen field.",
        color: "#15803d",
    },
];

// Chat-assistant rubric over [0,5]; zero means no appraisal on record yet.
// Distinct from the three domain rubrics above and never interchangeable
// with them.
pub static OVERALL_BANDS: [Band; 6] = [
    Band {
        min: 4.5,
        max: 5.0,
        label: "Excellent",
        description: "Outstanding overall standing across all appraisal areas.",
        suggestion: "Keep it up and consider mentoring other students.",
        color: "#15803d",
    },
    Band {
        min: 4.0,
        max: 4.49,
        label: "Very Good",
        description: "Strong overall standing with minor areas to polish.",
        suggestion: "Review the lowest-scoring area with your counselor.",
        color: "#22c55e",
    },
    Band {
        min: 3.0,
        max: 3.99,
        label: "Good",
        description: "Solid overall standing with clear next steps.",
        suggestion: "Pick one area to focus on this month.",
        color: "#eab308",
    },
    Band {
        min: 2.0,
        max: 2.99,
        label: "Fair",
        description: "Overall standing below target in more than one area.",
        suggestion: "Book a counseling session to plan improvements.",
        color: "#f97316",
    },
    Band {
        min: 0.0,
        max: 1.99,
        label: "Critical",
        description: "Overall standing needs urgent attention.",
        suggestion: "See your counselor as soon as possible.",
        color: "#dc2626",
    },
    Band {
        min: 0.0,
        max: 0.0,
        label: "Not Yet Evaluated",
        description: "No appraisal results on record yet.",
        suggestion: "Complete an appraisal to get your first evaluation.",
        color: "#94a3b8",
    },
];

/// Arithmetic mean of Likert responses. Every response must be an integer in
/// [1,5]; an empty set has no mean and is treated as invalid input so bad
/// data never aggregates silently.
pub fn score_category(responses: &[i64]) -> Result<f64, ScoreError> {
    if responses.is_empty() {
        return Err(ScoreError::InvalidResponseValue);
    }
    let mut sum: i64 = 0;
    for &r in responses {
        if !(1..=5).contains(&r) {
            return Err(ScoreError::InvalidResponseValue);
        }
        sum += r;
    }
    Ok(sum as f64 / responses.len() as f64)
}

fn domain_bands(domain: Domain) -> &'static [Band] {
    match domain {
        Domain::Academic => &ACADEMIC_BANDS,
        Domain::SocioEmotional => &SOCIO_EMOTIONAL_BANDS,
        Domain::Career => &CAREER_BANDS,
    }
}

/// Fixed-rubric lookup. Membership is `min <= score <= max` exactly as the
/// band tables list it; a score landing in the float gap between adjacent
/// bands resolves downward to the band with the greatest min at or below it.
pub fn evaluate(domain: Domain, score: f64) -> Result<&'static Band, ScoreError> {
    let bands = domain_bands(domain);
    let last = bands.last().ok_or(ScoreError::RubricNotFound)?;
    if score > last.max {
        return Err(ScoreError::RubricNotFound);
    }
    for band in bands {
        if score >= band.min && score <= band.max {
            return Ok(band);
        }
    }
    bands
        .iter()
        .rev()
        .find(|band| score >= band.min)
        .ok_or(ScoreError::RubricNotFound)
}

/// The 6-band overall rubric used by the chat assistant. Zero is its own
/// band ("not yet evaluated"); anything else resolves downward like the
/// domain rubrics.
pub fn overall_evaluation(score: f64) -> Result<&'static Band, ScoreError> {
    if !(0.0..=5.0).contains(&score) {
        return Err(ScoreError::RubricNotFound);
    }
    if score == 0.0 {
        return Ok(&OVERALL_BANDS[5]);
    }
    OVERALL_BANDS[..5]
        .iter()
        .find(|band| score >= band.min)
        .ok_or(ScoreError::RubricNotFound)
}

/// A counselor-authored criteria row, loaded from storage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub min_score: f64,
    pub max_score: f64,
    pub label: String,
    pub description: Option<String>,
    pub suggestion: Option<String>,
}

/// Same membership rule against counselor data. Authored bands may leave
/// gaps; a gap yields RubricNotFound rather than a guessed band. Callers
/// pass the rows ordered by min_score.
pub fn evaluate_with_criteria(criteria: &[Criterion], score: f64) -> Result<&Criterion, ScoreError> {
    criteria
        .iter()
        .find(|c| score >= c.min_score && score <= c.max_score)
        .ok_or(ScoreError::RubricNotFound)
}

/// Legacy fixed-rubric flow: raw area inputs are 0-100 and normalize onto
/// the same 0-5 scale as the Likert means via a straight /20.
pub fn normalize_legacy(raw: f64) -> Result<f64, ScoreError> {
    if !(0.0..=100.0).contains(&raw) {
        return Err(ScoreError::InvalidResponseValue);
    }
    Ok(raw / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_mean_is_exact() {
        assert_eq!(score_category(&[5, 5, 5, 5]), Ok(5.0));
        assert_eq!(score_category(&[1, 2, 3]), Ok(2.0));
        assert_eq!(score_category(&[1]), Ok(1.0));
        assert_eq!(score_category(&[2, 3]), Ok(2.5));
    }

    #[test]
    fn out_of_range_and_empty_responses_rejected() {
        assert_eq!(score_category(&[]), Err(ScoreError::InvalidResponseValue));
        assert_eq!(
            score_category(&[0, 3]),
            Err(ScoreError::InvalidResponseValue)
        );
        assert_eq!(
            score_category(&[3, 6]),
            Err(ScoreError::InvalidResponseValue)
        );
        assert_eq!(
            score_category(&[-1]),
            Err(ScoreError::InvalidResponseValue)
        );
    }

    #[test]
    fn academic_band_labels_at_listed_boundaries() {
        let cases = [
            (1.0, "Very Low Academic Performance"),
            (1.99, "Very Low Academic Performance"),
            (2.0, "Low Academic Performance"),
            (3.0, "Moderate Academic Performance"),
            (3.99, "Moderate Academic Performance"),
            (4.0, "High Academic Performance"),
            (4.49, "High Academic Performance"),
            (4.5, "Very High Academic Performance"),
            (5.0, "Very High Academic Performance"),
        ];
        for (score, label) in cases {
            assert_eq!(
                evaluate(Domain::Academic, score).map(|b| b.label),
                Ok(label),
                "score {score}"
            );
        }
    }

    #[test]
    fn career_adjacent_boundary_is_exact() {
        assert_eq!(
            evaluate(Domain::Career, 2.99).map(|b| b.label),
            Ok("Uncertain")
        );
        assert_eq!(
            evaluate(Domain::Career, 3.0).map(|b| b.label),
            Ok("Moderate Clarity")
        );
    }

    #[test]
    fn gap_scores_resolve_downward() {
        // 2.995 sits between the listed 2.99 and 3.0 cutoffs.
        assert_eq!(
            evaluate(Domain::Career, 2.995).map(|b| b.label),
            Ok("Uncertain")
        );
        assert_eq!(
            evaluate(Domain::SocioEmotional, 4.495).map(|b| b.label),
            Ok("Well-balanced")
        );
    }

    #[test]
    fn domain_scores_outside_coverage_are_errors() {
        assert_eq!(
            evaluate(Domain::Academic, 0.5),
            Err(ScoreError::RubricNotFound)
        );
        assert_eq!(
            evaluate(Domain::Academic, 5.01),
            Err(ScoreError::RubricNotFound)
        );
    }

    #[test]
    fn socio_emotional_band_labels() {
        assert_eq!(
            evaluate(Domain::SocioEmotional, 1.5).map(|b| b.label),
            Ok("Depressed/Highly Anxious")
        );
        assert_eq!(
            evaluate(Domain::SocioEmotional, 4.5).map(|b| b.label),
            Ok("Highly Resilient")
        );
    }

    #[test]
    fn overall_rubric_is_its_own_table() {
        assert_eq!(overall_evaluation(4.5).map(|b| b.label), Ok("Excellent"));
        assert_eq!(overall_evaluation(4.0).map(|b| b.label), Ok("Very Good"));
        assert_eq!(overall_evaluation(3.0).map(|b| b.label), Ok("Good"));
        assert_eq!(overall_evaluation(2.0).map(|b| b.label), Ok("Fair"));
        assert_eq!(overall_evaluation(0.5).map(|b| b.label), Ok("Critical"));
        assert_eq!(
            overall_evaluation(0.0).map(|b| b.label),
            Ok("Not Yet Evaluated")
        );
        assert_eq!(overall_evaluation(-0.1), Err(ScoreError::RubricNotFound));
        assert_eq!(overall_evaluation(5.1), Err(ScoreError::RubricNotFound));
    }

    #[test]
    fn legacy_normalization_is_div_20() {
        assert_eq!(normalize_legacy(80.0), Ok(4.0));
        assert_eq!(normalize_legacy(0.0), Ok(0.0));
        assert_eq!(normalize_legacy(100.0), Ok(5.0));
        assert_eq!(
            normalize_legacy(100.5),
            Err(ScoreError::InvalidResponseValue)
        );
        assert_eq!(
            normalize_legacy(-1.0),
            Err(ScoreError::InvalidResponseValue)
        );
    }

    #[test]
    fn legacy_normalized_score_lands_in_fixed_rubric() {
        let score = normalize_legacy(80.0).expect("normalize");
        assert_eq!(
            evaluate(Domain::Academic, score).map(|b| b.label),
            Ok("High Academic Performance")
        );
    }

    #[test]
    fn authored_criteria_match_and_gap() {
        let criteria = vec![
            Criterion {
                min_score: 1.0,
                max_score: 2.5,
                label: "Needs Support".to_string(),
                description: None,
                suggestion: None,
            },
            Criterion {
                min_score: 3.0,
                max_score: 5.0,
                label: "On Track".to_string(),
                description: None,
                suggestion: None,
            },
        ];
        assert_eq!(
            evaluate_with_criteria(&criteria, 2.0).map(|c| c.label.as_str()),
            Ok("Needs Support")
        );
        assert_eq!(
            evaluate_with_criteria(&criteria, 4.0).map(|c| c.label.as_str()),
            Ok("On Track")
        );
        // The counselor left 2.5..3.0 uncovered; surface it, don't guess.
        assert_eq!(
            evaluate_with_criteria(&criteria, 2.75),
            Err(ScoreError::RubricNotFound)
        );
    }

    #[test]
    fn category_names_map_to_fixed_domains() {
        assert_eq!(
            Domain::from_category_name("Academic Performance"),
            Some(Domain::Academic)
        );
        assert_eq!(
            Domain::from_category_name("Socio-Emotional Wellness"),
            Some(Domain::SocioEmotional)
        );
        assert_eq!(
            Domain::from_category_name("Career Readiness"),
            Some(Domain::Career)
        );
        assert_eq!(Domain::from_category_name("Sports"), None);
    }
}
