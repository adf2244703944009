/// Coarse category of a request, used to pick a model. Closed set: adding
/// an intent is a compile-time change, not a registry insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Simple,
    Action,
    Context,
    Vision,
    Code,
}

impl Intent {
    /// Pool key of the model that serves this intent.
    pub fn model_name(self) -> &'static str {
        match self {
            Intent::Simple => "phi",
            Intent::Action => "qwen",
            Intent::Context => "llama",
            Intent::Vision => "vision",
            Intent::Code => "coder",
        }
    }
}

const VISION_KEYWORDS: &[&str] = &[
    "tela", "screen", "imagem", "image", "foto", "vendo", "olha o que",
];
const CODE_KEYWORDS: &[&str] = &[
    "código", "codigo", "code", "função", "funcao", "function", "script", "bug", "programa",
    "refactor",
];
const ACTION_KEYWORDS: &[&str] = &[
    "abre", "abrir", "open", "fecha", "fechar", "close", "executa", "launch", "toca", "play",
    "pausa",
];
const CONTEXT_KEYWORDS: &[&str] = &[
    "documento", "document", "resuma", "resumo", "summarize", "contexto", "context", "história",
    "historia", "analisa o texto",
];

/// Ordered keyword classification. The group order is part of the contract
/// (vision → code → action → context → simple) because the keyword sets can
/// overlap; the first matching group wins.
pub fn detect_intent(text: &str) -> Intent {
    let lowered = text.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    if matches(VISION_KEYWORDS) {
        Intent::Vision
    } else if matches(CODE_KEYWORDS) {
        Intent::Code
    } else if matches(ACTION_KEYWORDS) {
        Intent::Action
    } else if matches(CONTEXT_KEYWORDS) {
        Intent::Context
    } else {
        Intent::Simple
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn portuguese_trigger_phrases() {
        assert_eq!(detect_intent("abre o chrome"), Intent::Action);
        assert_eq!(detect_intent("vendo a tela agora"), Intent::Vision);
        assert_eq!(detect_intent("explica esse código"), Intent::Code);
        assert_eq!(detect_intent("resuma esse documento"), Intent::Context);
        assert_eq!(detect_intent("qual a capital da França?"), Intent::Simple);
    }

    #[test]
    fn classification_is_case_insensitive() {
        assert_eq!(detect_intent("ABRE O CHROME"), Intent::Action);
        assert_eq!(detect_intent("Explica esse CÓDIGO"), Intent::Code);
    }

    #[test]
    fn group_order_resolves_overlaps() {
        // "abre o script" mentions both an action verb and a code keyword;
        // code is checked first and must win.
        assert_eq!(detect_intent("abre o script"), Intent::Code);
        // Vision outranks code.
        assert_eq!(detect_intent("olha o que esse código faz na tela"), Intent::Vision);
        // Action outranks context.
        assert_eq!(detect_intent("abre o documento"), Intent::Action);
    }

    #[test]
    fn intents_map_to_their_models() {
        assert_eq!(Intent::Simple.model_name(), "phi");
        assert_eq!(Intent::Action.model_name(), "qwen");
        assert_eq!(Intent::Context.model_name(), "llama");
        assert_eq!(Intent::Vision.model_name(), "vision");
        assert_eq!(Intent::Code.model_name(), "coder");
    }
}
