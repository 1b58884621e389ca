//! Helpers rendering filter clauses into capture-filter text.

/// Join clauses with a boolean keyword, dropping empty ones.
///
/// Zero or one surviving clause is returned bare. Two or more are wrapped
/// in a single pair of parentheses, each clause passed through [`embed`].
pub(crate) fn join_group<I>(clauses: I, keyword: &str) -> String
where
    I: IntoIterator<Item = String>,
{
    let mut clauses: Vec<String> = clauses.into_iter().filter(|c| !c.is_empty()).collect();
    if clauses.len() < 2 {
        return clauses.pop().unwrap_or_default();
    }
    let clauses: Vec<String> = clauses.into_iter().map(embed).collect();
    format!("({})", clauses.join(&format!(" {} ", keyword)))
}

/// Parenthesise a clause that has a top-level `and`/`or`.
///
/// libpcap gives `and` and `or` equal precedence, left to right, so such a
/// clause would regroup with its neighbours once placed in a longer chain.
pub(crate) fn embed(clause: String) -> String {
    if has_top_level_conjunction(&clause) {
        format!("({})", clause)
    } else {
        clause
    }
}

fn has_top_level_conjunction(clause: &str) -> bool {
    let mut depth = 0i32;
    for token in clause.split_whitespace() {
        let word = token.to_ascii_lowercase();
        if depth == 0 && matches!(word.as_str(), "and" | "or" | "&&" | "||") {
            return true;
        }
        for c in token.chars() {
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                _ => {}
            }
        }
    }
    false
}

/// AND together per-category OR-expressions.
///
/// A lone category follows the `join_group` rules; with several categories
/// each one is parenthesised so `tcp` and `dst port 80` become
/// `(tcp) and (dst port 80)`.
pub(crate) fn join_categories(categories: Vec<Vec<String>>) -> String {
    let mut categories: Vec<Vec<String>> = categories
        .into_iter()
        .map(|tokens| tokens.into_iter().filter(|t| !t.is_empty()).collect::<Vec<_>>())
        .filter(|tokens| !tokens.is_empty())
        .collect();

    if categories.len() < 2 {
        return categories
            .pop()
            .map(|tokens| join_group(tokens, "or"))
            .unwrap_or_default();
    }

    categories
        .iter()
        .map(|tokens| format!("({})", tokens.join(" or ")))
        .collect::<Vec<_>>()
        .join(" and ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_join_group() {
        assert_eq!(join_group(strings(&[]), "or"), "");
        assert_eq!(join_group(strings(&["", ""]), "or"), "");
        assert_eq!(join_group(strings(&["tcp", ""]), "or"), "tcp");
        assert_eq!(join_group(strings(&["tcp", "udp"]), "or"), "(tcp or udp)");
        assert_eq!(
            join_group(strings(&["tcp", "port 80", "host 10.0.0.1"]), "and"),
            "(tcp and port 80 and host 10.0.0.1)"
        );
    }

    #[test]
    fn test_join_group_wraps_bare_chains() {
        assert_eq!(
            join_group(strings(&["udp port 53", "(tcp) and (dst port 80)"]), "or"),
            "(udp port 53 or ((tcp) and (dst port 80)))"
        );
        assert_eq!(
            join_group(strings(&["icmp", "udp and port 53"]), "and"),
            "(icmp and (udp and port 53))"
        );
        assert_eq!(join_group(strings(&["(tcp) and (port 80)"]), "or"), "(tcp) and (port 80)");
    }

    #[test]
    fn test_embed() {
        assert_eq!(embed("port 80".to_string()), "port 80");
        assert_eq!(embed("not tcp".to_string()), "not tcp");
        assert_eq!(embed("(tcp or udp)".to_string()), "(tcp or udp)");
        assert_eq!(embed("(tcp) or (udp)".to_string()), "((tcp) or (udp))");
        assert_eq!(embed("tcp && port 22".to_string()), "(tcp && port 22)");
        assert_eq!(embed(String::new()), "");
    }

    #[test]
    fn test_join_categories() {
        assert_eq!(join_categories(vec![vec![], vec![]]), "");
        assert_eq!(join_categories(vec![strings(&["tcp"])]), "tcp");
        assert_eq!(join_categories(vec![strings(&["tcp", "udp"])]), "(tcp or udp)");
        assert_eq!(
            join_categories(vec![strings(&["tcp"]), vec![], strings(&["dst port 80"])]),
            "(tcp) and (dst port 80)"
        );
        assert_eq!(
            join_categories(vec![strings(&["tcp", "udp"]), strings(&["port 53"])]),
            "(tcp or udp) and (port 53)"
        );
    }
}
