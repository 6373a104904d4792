use std::sync::Arc;

use validata::agent::{LogEntry, MISSING_IDENTIFIER_REASON};
use validata::config::AgentSettings;
use validata::llm::LlmError;
use validata::{AgentError, Department, ScriptedLlmClient, SelfCorrectingAgent};

fn agent(responses: &[&str], max_attempts: u32) -> (SelfCorrectingAgent<Arc<ScriptedLlmClient>>, Arc<ScriptedLlmClient>) {
    let client = Arc::new(ScriptedLlmClient::new(responses.iter().copied()));
    let agent = SelfCorrectingAgent::new(client.clone(), &AgentSettings { max_attempts });
    (agent, client)
}

#[tokio::test]
async fn test_word_numbers_and_email_are_normalized() {
    let (agent, client) = agent(
        &[r#"{"employees": [{"user_id": 42, "name": "Jane Doe", "age": "thirty", "email": "JANE@X.com"}], "rejected": []}"#],
        3,
    );

    let result = agent
        .run("Employee 42, Jane Doe, age thirty, email JANE@X.com")
        .await
        .unwrap();

    assert_eq!(result.accepted.len(), 1);
    let jane = &result.accepted[0];
    assert_eq!(jane.user_id, 42);
    assert_eq!(jane.name, "Jane Doe");
    assert_eq!(jane.age, Some(30));
    assert_eq!(jane.email.as_deref(), Some("jane@x.com"));
    assert!(result.rejected.is_empty());
    assert_eq!(result.total_attempts, 0);
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_missing_identifier_is_rejected_without_correction() {
    let (agent, client) = agent(
        &[r#"[{"name": "Lee", "department": "Sales"}, {"user_id": 5, "name": "Ava", "age": 31}]"#],
        3,
    );

    let result = agent.run("Lee in sales; employee 5 Ava, 31").await.unwrap();

    assert_eq!(result.accepted.len(), 1);
    assert_eq!(result.rejected.len(), 1);
    let rejected = &result.rejected[0];
    assert_eq!(rejected.attempts, 0);
    assert_eq!(rejected.reasons, vec![MISSING_IDENTIFIER_REASON.to_string()]);
    assert!(rejected.reasons[0].contains("missing"));
    assert!(rejected.reasons[0].contains("user_id"));
    assert!(rejected.raw_record.contains("Lee"));
    // Never sent to Correct
    assert_eq!(client.call_count(), 1);
    assert_eq!(result.corrections().count(), 0);
}

#[tokio::test]
async fn test_correction_fixes_violations() {
    let (agent, client) = agent(
        &[
            r#"{"employees": [{"user_id": 7, "name": "Sam Park", "age": 150, "department": "Basket"}]}"#,
            r#"{"employees": [{"user_id": 7, "name": "Sam Park", "age": null, "department": "eng"}]}"#,
        ],
        3,
    );

    let result = agent.run("Employee 7 is Sam Park, 150, basket weaving").await.unwrap();

    assert_eq!(result.accepted.len(), 1);
    assert_eq!(result.accepted[0].department, Some(Department::Engineering));
    assert_eq!(result.accepted[0].age, None);
    assert_eq!(result.total_attempts, 1);

    let corrections: Vec<_> = result.corrections().collect();
    assert_eq!(corrections.len(), 1);
    assert_eq!(corrections[0].attempt, 1);
    assert!(corrections[0].prior_json.contains("150"));
    assert!(corrections[0].resulting_json.contains("eng"));
    assert!(corrections[0].violations.iter().any(|v| v.contains("age")));
    assert!(corrections[0].violations.iter().any(|v| v.contains("department")));

    // The correction request carries the violations verbatim
    let requests = client.requests();
    assert!(requests[1].user.contains("outside 16..=80"));
}

#[tokio::test]
async fn test_attempts_never_exceed_the_cap() {
    for max_attempts in 0..=4u32 {
        let responses: Vec<String> = (0..10)
            .map(|i| format!(r#"[{{"user_id": 9, "name": "Kim", "age": {}}}]"#, 200 + i))
            .collect();
        let client = Arc::new(ScriptedLlmClient::new(responses));
        let agent = SelfCorrectingAgent::new(client.clone(), &AgentSettings { max_attempts });

        let result = agent.run("Employee 9, Kim, age 200").await.unwrap();

        assert!(result.total_attempts <= max_attempts);
        assert_eq!(result.total_attempts, max_attempts);
        assert_eq!(client.call_count(), 1 + max_attempts as usize);
        assert!(result.accepted.is_empty());
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].attempts, max_attempts);
        assert!(result.rejected[0].reasons.iter().any(|r| r.contains("age")));
    }
}

#[tokio::test]
async fn test_garbage_output_finalizes_without_error() {
    let (agent, client) = agent(&["Sorry, I cannot turn that into JSON."], 3);

    let result = agent.run("Employee 3, Ana Ruiz").await.unwrap();

    assert!(result.accepted.is_empty());
    assert!(result.rejected.is_empty());
    assert!(result.extraction_error.is_some());
    assert!(result
        .log
        .iter()
        .any(|entry| matches!(entry, LogEntry::ExtractionError { .. })));
    assert_eq!(result.total_attempts, 0);
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_object_without_employee_fields_is_an_extraction_error() {
    let (agent, client) = agent(&[r#"{"message": "I cannot extract anything"}"#], 3);

    let result = agent.run("The weather was nice today.").await.unwrap();

    assert!(result.accepted.is_empty());
    assert!(result.rejected.is_empty());
    assert!(result.extraction_error.is_some());
    assert!(result
        .log
        .iter()
        .any(|entry| matches!(entry, LogEntry::ExtractionError { .. })));
    assert_eq!(client.call_count(), 1);
}

#[tokio::test]
async fn test_fabricated_identifier_is_discarded() {
    let (agent, _client) = agent(
        &[
            r#"[{"user_id": 1, "name": "Ana", "age": 12}]"#,
            r#"[{"user_id": 1, "name": "Ana", "age": 22}, {"user_id": 99, "name": "Ghost", "age": 40}]"#,
        ],
        3,
    );

    let result = agent.run("Employee 1, Ana, aged 22").await.unwrap();

    assert_eq!(result.accepted.len(), 1);
    assert_eq!(result.accepted[0].user_id, 1);
    assert!(result.log.iter().any(|entry| matches!(
        entry,
        LogEntry::Discarded { identifier: Some(id), .. } if id == "99"
    )));
}

#[tokio::test]
async fn test_correction_rejection_matches_on_identifier_field() {
    let (agent, _client) = agent(
        &[
            r#"[{"user_id": 1, "name": "Ana", "age": 12}, {"user_id": 30, "name": "Bo", "age": 200}]"#,
            r#"{"employees": [], "rejected": [{"raw_record": "{\"user_id\":30,\"name\":\"Bo\",\"age\":200,\"performance_score\":1}", "reasons": ["age of Bo unknowable"]}]}"#,
        ],
        3,
    );

    let result = agent.run("Employee 1, Ana, 12; employee 30, Bo, 200").await.unwrap();

    assert!(result.accepted.is_empty());
    assert_eq!(result.rejected.len(), 2);
    let bo = result.rejected.iter().find(|r| r.raw_record.contains("Bo")).unwrap();
    assert!(bo.reasons.contains(&"age of Bo unknowable".to_string()));
    assert!(!bo.reasons.iter().any(|r| r == "dropped from correction output"));
    let ana = result.rejected.iter().find(|r| r.raw_record.contains("Ana")).unwrap();
    assert!(ana.reasons.contains(&"dropped from correction output".to_string()));
    assert!(!ana.reasons.iter().any(|r| r.contains("unknowable")));
}

#[tokio::test]
async fn test_model_rejections_are_carried_through() {
    let (agent, _client) = agent(
        &[r#"{"employees": [], "rejected": [{"raw_record": "Bob, no id", "reasons": []}]}"#],
        3,
    );

    let result = agent.run("Bob, no id").await.unwrap();

    assert_eq!(result.rejected.len(), 1);
    assert_eq!(result.rejected[0].raw_record, "Bob, no id");
    assert_eq!(result.rejected[0].reasons, vec!["rejected by extractor".to_string()]);
}

#[tokio::test]
async fn test_correction_transport_failure_rejects_pending() {
    let client = Arc::new(ScriptedLlmClient::from_results([
        Ok(r#"[{"user_id": 4, "name": "Dana", "salary": -1}]"#.to_string()),
        Err(LlmError::Network("timed out".to_string())),
    ]));
    let agent = SelfCorrectingAgent::new(client, &AgentSettings { max_attempts: 3 });

    let result = agent.run("Employee 4, Dana, salary -1").await.unwrap();

    assert!(result.accepted.is_empty());
    assert_eq!(result.rejected.len(), 1);
    assert!(result.rejected[0].reasons[0].starts_with("correction call failed"));
    assert!(result.rejected[0].reasons.iter().any(|r| r.contains("salary")));
    assert_eq!(result.total_attempts, 1);
    assert!(result
        .log
        .iter()
        .any(|entry| matches!(entry, LogEntry::CorrectionError { attempt: 1, .. })));
}

#[tokio::test]
async fn test_extraction_transport_failure_is_an_error() {
    let client = ScriptedLlmClient::from_results([Err(LlmError::Api("HTTP 500".to_string()))]);
    let agent = SelfCorrectingAgent::new(client, &AgentSettings::default());

    let err = agent.run("Employee 1, Ana").await.unwrap_err();
    assert!(matches!(err, AgentError::Llm(LlmError::Api(_))));
}
