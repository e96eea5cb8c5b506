use rstest::rstest;

use ductwork_kernel::error::ParseError;
use ductwork_kernel::lexer::{tokenize, Token};

#[rstest]
#[case("a b c", vec!["a", "b", "c"])]
#[case("a|b", vec!["a", "|", "b"])]
#[case("a | b>out", vec!["a", "|", "b", ">", "out"])]
#[case("x >> log", vec!["x", ">>", "log"])]
#[case("cat < in.txt", vec!["cat", "<", "in.txt"])]
#[case("cmd --flag -n 3", vec!["cmd", "--flag", "-n", "3"])]
#[case("ls /tmp/*.rs {a,b}", vec!["ls", "/tmp/*.rs", "{a,b}"])]
fn token_tables(#[case] input: &str, #[case] expected: Vec<&str>) {
    let tokens = tokenize(input, false).unwrap();
    let rendered: Vec<String> = tokens.iter().map(|t| t.token.to_string()).collect();
    assert_eq!(rendered, expected);
}

#[rstest]
#[case("", 0)]
#[case("   \t\n", 0)]
#[case("one", 1)]
#[case("a 'b c' d", 3)]
#[case(r#"x "a|b" y"#, 3)]
fn token_counts(#[case] input: &str, #[case] expected: usize) {
    assert_eq!(tokenize(input, false).unwrap().len(), expected);
}

#[test]
fn quotes_group_one_token_and_mark_it() {
    let tokens = tokenize("a 'b c' d", false).unwrap();
    assert_eq!(tokens.len(), 3);
    let Token::Word(middle) = &tokens[1].token else {
        panic!("expected a word");
    };
    assert!(middle.quoted);
    assert_eq!(middle.text, "b c");

    let Token::Word(first) = &tokens[0].token else {
        panic!("expected a word");
    };
    assert!(!first.quoted);
}

#[test]
fn quoted_operators_are_literal() {
    let tokens = tokenize("echo '|' '>'", false).unwrap();
    assert_eq!(tokens.len(), 3);
    assert!(matches!(&tokens[1].token, Token::Word(w) if w.text == "|"));
    assert!(matches!(&tokens[2].token, Token::Word(w) if w.text == ">"));
}

#[rstest]
#[case("a 'open", 2)]
#[case(r#"b "open"#, 2)]
fn partial_mode_keeps_unterminated_tail(#[case] input: &str, #[case] count: usize) {
    let tokens = tokenize(input, true).unwrap();
    assert_eq!(tokens.len(), count);
    let Token::Word(tail) = &tokens[count - 1].token else {
        panic!("expected a word");
    };
    assert!(tail.unterminated);

    assert!(matches!(
        tokenize(input, false),
        Err(ParseError::UnterminatedQuote(_))
    ));
}

#[test]
fn spans_point_into_the_source() {
    let src = "echo 'a b' | wc";
    let tokens = tokenize(src, false).unwrap();
    assert_eq!(tokens[0].span, 0..4);
    assert_eq!(tokens[1].span, 5..10);
    assert_eq!(tokens[2].span, 11..12);
    assert_eq!(tokens[3].span, 13..15);
}
