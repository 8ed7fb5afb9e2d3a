/// Disclaimer appended to every outbound deal package.
pub const COMPLIANCE_DISCLAIMER: &str = "This is not an offer to sell real estate. Information is \
deemed reliable but not guaranteed; buyers must perform their own due diligence. Reply STOP to \
opt out of future messages.";

const SINGLE_WORD_KEYWORDS: [&str; 3] = ["stop", "unsubscribe", "remove"];

/// Opt-out keyword found in a buyer reply, matched on whole words.
pub fn detect_opt_out(text: &str) -> Option<&'static str> {
    let normalized: String = text
        .chars()
        .map(|ch| {
            if ch.is_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    let words: Vec<&str> = normalized.split_whitespace().collect();

    for keyword in SINGLE_WORD_KEYWORDS {
        if words.iter().any(|word| *word == keyword) {
            return Some(keyword);
        }
    }

    let opt_out = words.iter().any(|word| *word == "optout")
        || words
            .windows(2)
            .any(|pair| pair[0] == "opt" && pair[1] == "out");
    if opt_out {
        return Some("opt out");
    }

    None
}

#[cfg(test)]
mod tests {
    use super::detect_opt_out;

    #[test]
    fn detects_keywords_regardless_of_case_and_punctuation() {
        assert_eq!(detect_opt_out("STOP"), Some("stop"));
        assert_eq!(detect_opt_out("Please unsubscribe me."), Some("unsubscribe"));
        assert_eq!(detect_opt_out("opt-out please"), Some("opt out"));
        assert_eq!(detect_opt_out("Remove me from this list"), Some("remove"));
    }

    #[test]
    fn ignores_words_that_merely_contain_keywords() {
        assert_eq!(detect_opt_out("Interested, what's the bus stopover?"), None);
        assert_eq!(detect_opt_out("Can you send the removal estimate?"), None);
        assert_eq!(detect_opt_out("I'll opt in"), None);
    }
}
