//! Unit tests for generate request parsing and defaults

use txt2img_serving::api::GenerateRequest;
use txt2img_serving::config::GenerationDefaults;
use txt2img_serving::AppError;

#[test]
fn test_defaults_applied_when_absent() {
    let request: GenerateRequest = serde_json::from_str(r#"{"prompt": "a red fox"}"#).unwrap();
    let params = request.into_params(&GenerationDefaults::default()).unwrap();

    assert_eq!(params.prompt, "a red fox");
    assert_eq!(params.inference_steps, 60);
    assert_eq!(params.guidance_scale, 7.5);
    assert_eq!(params.max_sequence_length, 512);
}

#[test]
fn test_explicit_values_pass_through() {
    let request: GenerateRequest = serde_json::from_str(
        r#"{"prompt": "a red fox", "inference_steps": 50, "guidance_scale": 3.5, "max_sequence_length": 256}"#,
    )
    .unwrap();
    let params = request.into_params(&GenerationDefaults::default()).unwrap();

    assert_eq!(params.inference_steps, 50);
    assert_eq!(params.guidance_scale, 3.5);
    assert_eq!(params.max_sequence_length, 256);
}

#[test]
fn test_configured_defaults_are_used() {
    let defaults = GenerationDefaults {
        inference_steps: 4,
        guidance_scale: 0.5,
        max_sequence_length: 256,
    };
    let params = GenerateRequest::new("a red fox").into_params(&defaults).unwrap();

    assert_eq!(params.inference_steps, 4);
    assert_eq!(params.guidance_scale, 0.5);
    assert_eq!(params.max_sequence_length, 256);
}

#[test]
fn test_missing_prompt_rejected() {
    let request: GenerateRequest = serde_json::from_str(r#"{"inference_steps": 10}"#).unwrap();
    let result = request.into_params(&GenerationDefaults::default());
    assert!(matches!(result, Err(AppError::PromptRequired)));
}

#[test]
fn test_null_and_empty_prompt_rejected() {
    for body in [r#"{"prompt": null}"#, r#"{"prompt": ""}"#] {
        let request: GenerateRequest = serde_json::from_str(body).unwrap();
        let result = request.into_params(&GenerationDefaults::default());
        assert!(matches!(result, Err(AppError::PromptRequired)), "body: {}", body);
    }
}

#[test]
fn test_whitespace_prompt_is_accepted() {
    // Only presence is checked; the pipeline decides what a blank prompt means.
    let params = GenerateRequest::new("  ")
        .into_params(&GenerationDefaults::default())
        .unwrap();
    assert_eq!(params.prompt, "  ");
}

#[test]
fn test_request_serialization_omits_unset_fields() {
    let json = serde_json::to_value(GenerateRequest::new("a red fox")).unwrap();
    assert_eq!(json, serde_json::json!({"prompt": "a red fox"}));
}

#[test]
fn test_integral_floats_and_numeric_strings_accepted() {
    let request: GenerateRequest = serde_json::from_str(
        r#"{"prompt": "x", "inference_steps": 50.0, "guidance_scale": "3.5", "max_sequence_length": "256"}"#,
    )
    .unwrap();
    let params = request.into_params(&GenerationDefaults::default()).unwrap();

    assert_eq!(params.inference_steps, 50);
    assert_eq!(params.guidance_scale, 3.5);
    assert_eq!(params.max_sequence_length, 256);
}

#[test]
fn test_unusable_hyperparameters_fall_back_to_defaults() {
    for body in [
        r#"{"prompt": "x", "inference_steps": -1, "guidance_scale": 0, "max_sequence_length": 2.5}"#,
        r#"{"prompt": "x", "inference_steps": "many", "guidance_scale": [7.5], "max_sequence_length": null}"#,
        r#"{"prompt": "x", "inference_steps": 99999999999, "guidance_scale": -7.5, "max_sequence_length": {}}"#,
    ] {
        let request: GenerateRequest = serde_json::from_str(body).unwrap();
        let params = request.into_params(&GenerationDefaults::default()).unwrap();

        assert_eq!(params.inference_steps, 60, "body: {}", body);
        assert_eq!(params.guidance_scale, 7.5, "body: {}", body);
        assert_eq!(params.max_sequence_length, 512, "body: {}", body);
    }
}

#[test]
fn test_non_string_prompt_follows_truthiness() {
    let request: GenerateRequest = serde_json::from_str(r#"{"prompt": 42}"#).unwrap();
    assert_eq!(
        request.into_params(&GenerationDefaults::default()).unwrap().prompt,
        "42"
    );

    for body in [r#"{"prompt": 0}"#, r#"{"prompt": false}"#, r#"{"prompt": []}"#] {
        let request: GenerateRequest = serde_json::from_str(body).unwrap();
        let result = request.into_params(&GenerationDefaults::default());
        assert!(matches!(result, Err(AppError::PromptRequired)), "body: {}", body);
    }
}
