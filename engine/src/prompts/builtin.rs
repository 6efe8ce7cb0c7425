use super::{ids, PromptTemplate};

const ANALYST_SYSTEM: &str = "You are a buy-side equity analyst. Answer with exactly one JSON object and no other text.";

/// Synthesis and contrarian reasoning go to the stronger hosted model
const REASONING_PROMPTS: [&str; 4] = [
    ids::THESIS_SYNTHESIS,
    ids::VARIANT_PERCEPTION,
    ids::BULL_BEAR,
    ids::INVESTMENT_MEMO,
];

const REASONING_PROVIDER: &str = "openai";

fn template(id: &str, user_template: &str, temperature: f32, max_tokens: u32) -> PromptTemplate {
    let provider = REASONING_PROMPTS
        .iter()
        .any(|reasoning| *reasoning == id)
        .then(|| REASONING_PROVIDER.to_string());

    PromptTemplate {
        id: id.to_string(),
        system: ANALYST_SYSTEM.to_string(),
        user_template: user_template.trim().to_string(),
        temperature,
        max_tokens,
        provider,
    }
}

pub(super) fn templates() -> Vec<PromptTemplate> {
    vec![
        template(
            ids::IDEA_GENERATION,
            r#"
Macro backdrop:
[[macro_snapshot]]

Candidate universe and existing coverage:
[[prior_research]]

Propose new long ideas from the universe above. Skip tickers already covered.
Return {"ideas": [{"ticker": str, "company": str, "thesis": str}]}.
"#,
            0.7,
            2048,
        ),
        template(
            ids::BUSINESS_OVERVIEW,
            r#"
Company: [[company]] ([[ticker]])
Idea: [[prior_research]]

Describe the business model, segments, customers and competitive position.
Return {"summary": str, "segments": [str], "moat": str, "confidence": "high"|"medium"|"low"}.
"#,
            0.3,
            2048,
        ),
        template(
            ids::FINANCIAL_STATEMENTS,
            r#"
Company: [[company]] ([[ticker]])
Fundamentals:
[[quant_snapshot]]

Analyse growth, margins, cash conversion and balance sheet strength.
Return {"summary": str, "strengths": [str], "concerns": [str], "confidence": "high"|"medium"|"low"}.
"#,
            0.2,
            2048,
        ),
        template(
            ids::VALUATION,
            r#"
Company: [[company]] ([[ticker]])
Fundamentals:
[[quant_snapshot]]
Macro:
[[macro_snapshot]]

Value the company against peers and its own history.
Return {"fair_value": number, "method": str, "summary": str, "confidence": "high"|"medium"|"low"}.
"#,
            0.2,
            2048,
        ),
        template(
            ids::THESIS_SYNTHESIS,
            r#"
Company: [[company]] ([[ticker]])
Original idea: [[prior_research]]

Module findings:
[[supporting_analyses]]

Write the consolidated investment thesis.
Return {"thesis": str, "key_drivers": [str], "key_risks": [str], "summary": str}.
"#,
            0.3,
            4096,
        ),
        template(
            ids::VARIANT_PERCEPTION,
            r#"
Company: [[company]] ([[ticker]])
Research:
[[prior_research]]

Where does our view differ from consensus, and why is the market wrong?
Return {"consensus_view": str, "our_view": str, "why_market_is_wrong": str, "confidence": "high"|"medium"|"low"}.
"#,
            0.3,
            2048,
        ),
        template(
            ids::BULL_BEAR,
            r#"
Company: [[company]] ([[ticker]])
Live data:
[[quant_snapshot]]
Research:
[[prior_research]]

Build bull, base and bear scenarios. Probabilities are fractions that sum to 1.
Return {"bull_case": {"price_target": number, "probability": number, "narrative": str},
        "base_case": {"price_target": number, "probability": number, "narrative": str},
        "bear_case": {"price_target": number, "probability": number, "narrative": str}}.
"#,
            0.3,
            2048,
        ),
        template(
            ids::PRE_MORTEM,
            r#"
Company: [[company]] ([[ticker]])
Research:
[[prior_research]]

Assume the position lost 40% in a year. List the ways that happened.
Return {"failure_scenarios": [{"scenario": str, "probability": number, "early_warning": str}]}.
"#,
            0.5,
            2048,
        ),
        template(
            ids::RISK_ASSESSMENT,
            r#"
Company: [[company]] ([[ticker]])
Live data:
[[quant_snapshot]]
Macro:
[[macro_snapshot]]
Research:
[[prior_research]]

Assess business, financial, valuation and macro risk.
Return {"overall_risk_rating": "low"|"medium"|"high"|"very high", "risks": [{"risk": str, "severity": str}]}.
"#,
            0.2,
            2048,
        ),
        template(
            ids::CATALYSTS,
            r#"
Company: [[company]] ([[ticker]])
Research:
[[prior_research]]

Identify dated catalysts over the next 18 months.
Return {"catalysts": [{"event": str, "timing": str, "impact": "positive"|"negative"}]}.
"#,
            0.3,
            1536,
        ),
        template(
            ids::POSITION_SIZING,
            r#"
Company: [[company]] ([[ticker]])
Live data:
[[quant_snapshot]]
Macro:
[[macro_snapshot]]

Recommend a position size for a concentrated long-only portfolio.
Return {"position_size_pct": number, "rationale": str}.
"#,
            0.2,
            1024,
        ),
        template(
            ids::EXIT_STRATEGY,
            r#"
Company: [[company]] ([[ticker]])
Live data:
[[quant_snapshot]]

Define the sell discipline: targets, stop conditions and thesis breakers.
Return {"price_target": number, "stop_loss": number, "thesis_breakers": [str]}.
"#,
            0.2,
            1024,
        ),
        template(
            ids::INVESTMENT_MEMO,
            r#"
Company: [[company]] ([[ticker]])
Live data:
[[quant_snapshot]]
Macro:
[[macro_snapshot]]
Research:
[[prior_research]]

Supporting analyses:
[[supporting_analyses]]

Write the investment committee memo.
Return {"title": str, "executive_summary": str, "thesis": str, "valuation": str, "risks": [str], "catalysts": [str], "recommendation_rationale": str}.
"#,
            0.3,
            4096,
        ),
        template(
            ids::WEEKLY_BUNDLE,
            r#"
Macro:
[[macro_snapshot]]

This week's top memos, best first:
[[supporting_analyses]]

Write the weekly digest for the investment committee.
Return {"headline": str, "summary": str, "highlights": [{"ticker": str, "takeaway": str}]}.
"#,
            0.4,
            3072,
        ),
    ]
}
