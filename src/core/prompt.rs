//! Prompt building: ticker detection, quote enrichment and instruction templates.

use crate::core::config::Settings;
use crate::core::error::ChatError;
use crate::core::traits::QuoteProvider;
use di::{Ref, inject, injectable};
use log::info;
use minijinja::{Environment, context};

const QUOTE_TEMPLATE: &str = r#"Eres Prometeo, asistente financiero experto.
Analiza estos datos de {{ symbol }} y responde en {{ language }}:

Símbolo: {{ ticker }}
Precio actual: {{ price }}
Última actualización: {{ timestamp }}
"#;

const QUESTION_TEMPLATE: &str = r#"Eres Prometeo, asistente financiero experto.
El usuario preguntó: "{{ question }}"
Responde en {{ language }}.
"#;

/// Longest input still treated as a ticker.
pub const MAX_SYMBOL_CHARS: usize = 6;

/// Reply given instead of a generation when no quote could be found.
pub fn unavailable_notice(symbol: &str) -> String {
    format!("No se pudieron obtener datos para {symbol}")
}

/// Heuristic ticker check: 1 to 6 alphabetic characters once trimmed.
///
/// Short words ("hola") pass too; that is accepted.
pub fn is_symbol_like(input: &str) -> bool {
    let input = input.trim();
    let len = input.chars().count();
    (1..=MAX_SYMBOL_CHARS).contains(&len) && input.chars().all(char::is_alphabetic)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    /// Text to send to the generator.
    Generate(String),
    /// Final reply; the generator is not involved.
    Direct(String),
}

pub struct PromptBuilder {
    quotes: Ref<dyn QuoteProvider>,
    language: String,
    templates: Environment<'static>,
}

#[injectable]
impl PromptBuilder {
    #[inject]
    pub fn create(quotes: Ref<dyn QuoteProvider>, settings: Ref<Settings>) -> PromptBuilder {
        PromptBuilder::new(quotes, settings.response_language.clone())
    }
}

impl PromptBuilder {
    pub fn new(quotes: Ref<dyn QuoteProvider>, language: String) -> PromptBuilder {
        PromptBuilder {
            quotes,
            language,
            templates: Environment::new(),
        }
    }

    pub async fn build(&self, user_input: &str) -> Result<Prompt, ChatError> {
        let input = user_input.trim();

        if !is_symbol_like(input) {
            return self
                .render(
                    QUESTION_TEMPLATE,
                    context! { question => input, language => &self.language },
                )
                .map(Prompt::Generate);
        }

        let symbol = input.to_uppercase();
        let Some(quote) = self.quotes.lookup(&symbol).await else {
            info!("no quote available for {symbol}");
            return Ok(Prompt::Direct(unavailable_notice(&symbol)));
        };

        self.render(
            QUOTE_TEMPLATE,
            context! {
                symbol => &symbol,
                ticker => quote.ticker,
                price => quote.price,
                timestamp => quote.timestamp.as_deref().unwrap_or("N/A"),
                language => &self.language,
            },
        )
        .map(Prompt::Generate)
    }

    fn render(&self, template: &str, ctx: minijinja::Value) -> Result<String, ChatError> {
        self.templates
            .render_str(template, ctx)
            .map_err(|e| ChatError::Internal(format!("cannot render prompt: {e}")))
    }
}
