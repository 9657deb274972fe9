//! Prompt engine: version-tagged templates and language detection.
//!
//! Templates are selected by (detected language, analysis mode) and expose
//! exactly two substitution points: the candidate-folder list (rendered as
//! a JSON array so the model cannot misread it) and the sanitized input
//! block. The template version feeds the cache fingerprint so a template
//! change invalidates affected cached decisions.

use crate::privacy::{AnalysisMode, SanitizedInput};

/// Bumped whenever any template text changes.
pub const TEMPLATE_VERSION: &str = "v3";

/// How many body characters participate in language detection.
const DETECT_BODY_CHARS: usize = 200;

/// Languages with localized templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    En,
    Fr,
    De,
    Es,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Fr => "fr",
            Language::De => "de",
            Language::Es => "es",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "en" => Some(Language::En),
            "fr" => Some(Language::Fr),
            "de" => Some(Language::De),
            "es" => Some(Language::Es),
            _ => None,
        }
    }
}

/// A rendered prompt pair, ready for a provider adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
    pub language: Language,
    pub template_version: &'static str,
}

/// Stopword sets for best-effort detection. Deliberately small and
/// distinctive; ties and weak signals fall back to the configured default.
const FR_STOPWORDS: &[&str] = &[
    "le", "la", "les", "vous", "votre", "est", "pour", "avec", "bonjour", "merci", "cette", "nous",
];
const DE_STOPWORDS: &[&str] = &[
    "der", "die", "das", "und", "ist", "nicht", "sie", "ihre", "mit", "danke", "bitte", "wir",
];
const ES_STOPWORDS: &[&str] = &[
    "el", "los", "las", "que", "usted", "para", "gracias", "hola", "este", "con", "por", "su",
];
const EN_STOPWORDS: &[&str] = &[
    "the", "and", "you", "your", "for", "with", "please", "this", "thanks", "hello", "is", "we",
];

/// Template-based prompt engine.
#[derive(Debug, Clone)]
pub struct PromptEngine {
    default_language: Language,
}

impl PromptEngine {
    pub fn new(default_language: &str) -> Self {
        Self {
            default_language: Language::from_code(default_language).unwrap_or(Language::En),
        }
    }

    /// Best-effort language detection over the subject plus the first 200
    /// characters of the body. Falls back to the configured default when
    /// the signal is weak.
    pub fn detect_language(&self, subject: &str, body: &str) -> Language {
        let snippet: String = body.chars().take(DETECT_BODY_CHARS).collect();
        let combined = format!("{} {}", subject, snippet).to_lowercase();

        let mut scores = [
            (Language::En, 0usize),
            (Language::Fr, 0usize),
            (Language::De, 0usize),
            (Language::Es, 0usize),
        ];
        for word in combined.split(|c: char| !c.is_alphabetic()) {
            if word.is_empty() {
                continue;
            }
            for (language, score) in scores.iter_mut() {
                let set = match language {
                    Language::En => EN_STOPWORDS,
                    Language::Fr => FR_STOPWORDS,
                    Language::De => DE_STOPWORDS,
                    Language::Es => ES_STOPWORDS,
                };
                if set.contains(&word) {
                    *score += 1;
                }
            }
        }

        let (best, best_score) = scores
            .iter()
            .copied()
            .max_by_key(|(_, score)| *score)
            .unwrap_or((self.default_language, 0));
        let runner_up = scores
            .iter()
            .filter(|(language, _)| *language != best)
            .map(|(_, score)| *score)
            .max()
            .unwrap_or(0);

        // Require a clear winner with at least two hits.
        if best_score >= 2 && best_score > runner_up {
            best
        } else {
            self.default_language
        }
    }

    /// Render the (system, user) pair for one sanitized input.
    pub fn render(
        &self,
        input: &SanitizedInput,
        folders: &[String],
        mode: AnalysisMode,
    ) -> RenderedPrompt {
        let language = input
            .detected_language
            .as_deref()
            .and_then(Language::from_code)
            .unwrap_or_else(|| self.detect_language(&input.subject, &input.body));

        let folders_json =
            serde_json::to_string(folders).unwrap_or_else(|_| "[]".to_string());

        RenderedPrompt {
            system: system_template(language).to_string(),
            user: user_block(language, &folders_json, input, mode),
            language,
            template_version: TEMPLATE_VERSION,
        }
    }
}

/// Fixed system instructions: choose exactly one name from the list, emit
/// a JSON object with `folder` and `confidence`, no prose outside it.
fn system_template(language: Language) -> &'static str {
    match language {
        Language::En => {
            "You are an email classification assistant.\n\
             Rules:\n\
             1. Choose exactly one folder name from the provided list, character for character.\n\
             2. Respond with a JSON object with fields \"folder\" and \"confidence\" (0.0 to 1.0).\n\
             3. Never output any text outside that JSON object."
        }
        Language::Fr => {
            "Vous etes un assistant de classement d'emails.\n\
             Regles:\n\
             1. Choisissez exactement un nom de dossier dans la liste fournie, caractere pour caractere.\n\
             2. Repondez par un objet JSON avec les champs \"folder\" et \"confidence\" (0.0 a 1.0).\n\
             3. Ne produisez jamais de texte en dehors de cet objet JSON."
        }
        Language::De => {
            "Sie sind ein Assistent zur E-Mail-Klassifizierung.\n\
             Regeln:\n\
             1. Waehlen Sie genau einen Ordnernamen aus der Liste, Zeichen fuer Zeichen.\n\
             2. Antworten Sie mit einem JSON-Objekt mit den Feldern \"folder\" und \"confidence\" (0.0 bis 1.0).\n\
             3. Geben Sie niemals Text ausserhalb dieses JSON-Objekts aus."
        }
        Language::Es => {
            "Usted es un asistente de clasificacion de correo.\n\
             Reglas:\n\
             1. Elija exactamente un nombre de carpeta de la lista, caracter por caracter.\n\
             2. Responda con un objeto JSON con los campos \"folder\" y \"confidence\" (0.0 a 1.0).\n\
             3. Nunca escriba texto fuera de ese objeto JSON."
        }
    }
}

fn user_block(
    language: Language,
    folders_json: &str,
    input: &SanitizedInput,
    mode: AnalysisMode,
) -> String {
    let (intro, folders_label, from_label, subject_label, body_label, attachments_label, outro) =
        match language {
            Language::En => (
                "Classify this email into one of the available folders.",
                "Available folders",
                "From",
                "Subject",
                "Body",
                "Attachments",
                "Respond with JSON only.",
            ),
            Language::Fr => (
                "Classez cet email dans l'un des dossiers disponibles.",
                "Dossiers disponibles",
                "De",
                "Sujet",
                "Corps",
                "Pieces jointes",
                "Repondez uniquement en JSON.",
            ),
            Language::De => (
                "Ordnen Sie diese E-Mail einem der verfuegbaren Ordner zu.",
                "Verfuegbare Ordner",
                "Von",
                "Betreff",
                "Text",
                "Anhaenge",
                "Antworten Sie nur mit JSON.",
            ),
            Language::Es => (
                "Clasifique este correo en una de las carpetas disponibles.",
                "Carpetas disponibles",
                "De",
                "Asunto",
                "Cuerpo",
                "Adjuntos",
                "Responda solo con JSON.",
            ),
        };

    let mut block = format!(
        "{}\n\n{}: {}\n\n{}: {}\n{}: {}\n",
        intro, folders_label, folders_json, from_label, input.sender, subject_label, input.subject
    );
    if mode == AnalysisMode::Full {
        block.push_str(&format!("{}: {}\n", body_label, input.body));
    }
    if !input.attachment_hints.is_empty() {
        block.push_str(&format!(
            "{}: {}\n",
            attachments_label,
            input.attachment_hints.join(", ")
        ));
    }
    block.push_str(&format!("\n{}", outro));
    block
}
