use procura_core::{
    add_message_if_not_exists, deduplicate_messages, render_transcript, Message, Role,
};

#[test]
fn add_message_if_not_exists_is_idempotent() {
    let mut messages = vec![Message::user("hello")];
    assert!(add_message_if_not_exists(&mut messages, Message::assistant("hi")));
    let after_first = messages.clone();
    assert!(!add_message_if_not_exists(&mut messages, Message::assistant("hi")));
    assert_eq!(messages, after_first);
}

#[test]
fn same_content_different_role_is_distinct() {
    let mut messages = vec![Message::user("ok")];
    assert!(add_message_if_not_exists(&mut messages, Message::assistant("ok")));
    assert_eq!(messages.len(), 2);
}

#[test]
fn deduplicate_keeps_first_occurrence_order() {
    let messages = vec![
        Message::user("a"),
        Message::assistant("b"),
        Message::user("a"),
        Message::system("c"),
        Message::assistant("b"),
    ];
    let deduped = deduplicate_messages(messages);
    assert_eq!(
        deduped,
        vec![Message::user("a"), Message::assistant("b"), Message::system("c")]
    );
}

#[test]
fn foreign_role_names_normalize() {
    let human: Message =
        serde_json::from_str(r#"{"role":"human","content":"q"}"#).expect("human alias");
    let ai: Message = serde_json::from_str(r#"{"role":"ai","content":"a"}"#).expect("ai alias");
    assert_eq!(human.role, Role::User);
    assert_eq!(ai.role, Role::Assistant);
    assert_eq!(
        serde_json::to_value(&ai).expect("serialize")["role"],
        serde_json::json!("assistant")
    );
}

#[test]
fn renders_role_prefixed_lines() {
    let text = render_transcript(&[Message::user("q"), Message::assistant("a")]);
    assert_eq!(text, "user: q\nassistant: a");
}
