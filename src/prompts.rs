//! Prompt templates for the two model stages.
//!
//! The sources are embedded at compile time and served to a single minijinja
//! environment through a loader, so a broken template surfaces as a render
//! error rather than at start-up.

use minijinja::{context, Environment};
use serde::Serialize;

use crate::constants;
use crate::reference::CsvExcerpt;

const ANALYSIS_TEMPLATE: &str = include_str!("../templates/prompts/analysis.txt");
const DIAGRAM_TEMPLATE: &str = include_str!("../templates/prompts/diagram.txt");

/// System instruction sent with the diagram prompt.
pub const DIAGRAM_SYSTEM: &str = "あなたは、SVGフォーマットの高品質なビジネスプレゼンテーションスライドを作成する専門家です。提供された分析結果に基づいて、法人向けLPの企画設計のためのSVGを作成してください。日本語を含むテキストが文字化けしないよう注意してください。";

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Section {
    pub title: &'static str,
    pub focus: &'static str,
}

/// The three analysis sections, in the order the model must produce them.
pub const SECTIONS: [Section; 3] = [
    Section {
        title: "ターゲットの分析",
        focus: "このサービス/商品の理想的な法人顧客はどのような企業か、どのような課題を持っているのか",
    },
    Section {
        title: "訴求軸の検討",
        focus: "商品/サービスの最も魅力的な特徴と、それによって解決される顧客の課題",
    },
    Section {
        title: "訴求シナリオの検討",
        focus: "LPで情報を伝達する最適な順序、各セクションで伝えるべき内容",
    },
];

lazy_static::lazy_static! {
    static ref PROMPTS: Environment<'static> = {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        env.set_loader(|name| {
            Ok(match name {
                "analysis.txt" => Some(ANALYSIS_TEMPLATE.to_string()),
                "diagram.txt" => Some(DIAGRAM_TEMPLATE.to_string()),
                _ => None,
            })
        });
        env
    };
}

/// Prompt for the text analysis stage.
pub fn analysis_prompt(theme: &str, csv: Option<&CsvExcerpt>) -> Result<String, minijinja::Error> {
    let sample_json = csv
        .map(|c| serde_json::to_string_pretty(&c.sample_records()).unwrap_or_default())
        .unwrap_or_default();

    PROMPTS.get_template("analysis.txt")?.render(context! {
        theme => theme,
        sections => SECTIONS,
        csv => csv,
        sample_json => sample_json,
    })
}

/// Prompt for the diagram stage. `analysis` is embedded unchanged.
pub fn diagram_prompt(
    theme: &str,
    analysis: &str,
    reference_svg: Option<&str>,
) -> Result<String, minijinja::Error> {
    PROMPTS.get_template("diagram.txt")?.render(context! {
        theme => theme,
        analysis => analysis,
        sections => SECTIONS,
        reference_svg => reference_svg,
        width => constants::SLIDE_WIDTH,
        height => constants::SLIDE_HEIGHT,
    })
}
