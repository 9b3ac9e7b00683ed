//! End-to-end checks against a real GGUF file.
//!
//! Set `LLAMA_TEST_MODEL=/path/to/small.gguf` to run them; without it
//! every test returns early.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use llama_core::{
    ChatMessage, ContextParams, EngineConfig, FinishReason, FunctionCallMode, GenerateEvent,
    LlamaBackend, LlamaContext, LlamaError, LlamaModel, ModelParams, SamplingParams, Session,
    detokenize, token_to_bytes, token_to_piece_into, tokenize, tokenize_into,
};

fn model_path() -> Option<PathBuf> {
    match std::env::var_os("LLAMA_TEST_MODEL") {
        Some(p) => Some(PathBuf::from(p)),
        None => {
            eprintln!("LLAMA_TEST_MODEL not set, skipping");
            None
        }
    }
}

/// One backend for the whole test binary; it lives until process exit.
fn backend() -> &'static Arc<LlamaBackend> {
    static BACKEND: OnceLock<Arc<LlamaBackend>> = OnceLock::new();
    BACKEND.get_or_init(|| {
        let backend = LlamaBackend::init().expect("backend init");
        backend.set_log_callback();
        backend
    })
}

fn load(path: &PathBuf) -> Arc<LlamaModel> {
    Arc::new(LlamaModel::load_from_file(backend(), path, &ModelParams::with_gpu_layers(0)).unwrap())
}

#[test]
fn second_init_is_refused() {
    let Some(_) = model_path() else { return };
    let _live = backend();
    assert!(LlamaBackend::is_live());
    assert!(matches!(
        LlamaBackend::init(),
        Err(LlamaError::BackendAlreadyInitialized)
    ));
    assert!(!backend().system_info().is_empty());
}

#[test]
fn missing_file_fails_to_load() {
    let Some(_) = model_path() else { return };
    let err = LlamaModel::load_from_file(
        backend(),
        std::path::Path::new("/nonexistent/model.gguf"),
        &ModelParams::default(),
    )
    .err()
    .expect("load should fail");
    assert!(matches!(err, LlamaError::ModelLoadFailed { .. }));
}

#[test]
fn hello_world_scenario() {
    let Some(path) = model_path() else { return };
    let model = load(&path);
    let mut ctx = LlamaContext::new(Arc::clone(&model), &ContextParams::new(512, 4)).unwrap();

    let tokens = tokenize(&model, "hello world", true).unwrap();
    assert!(tokens.len() >= 2, "got {tokens:?}");

    assert!(ctx.logits().is_none());
    ctx.eval(&tokens, 0, 4).unwrap();

    let logits = ctx.logits().unwrap();
    assert_eq!(logits.len(), model.n_vocab() as usize);
    assert!(logits.iter().all(|l| !l.is_nan()));
}

#[test]
fn long_input_is_decoded_in_chunks() {
    let Some(path) = model_path() else { return };
    let model = load(&path);
    let params = ContextParams {
        n_batch: 32,
        n_ubatch: 32,
        ..ContextParams::new(512, 4)
    };
    let mut ctx = LlamaContext::new(Arc::clone(&model), &params).unwrap();
    assert!(ctx.n_batch() < ctx.n_ctx());

    let mut tokens = tokenize(&model, "one two three four five six seven eight", true).unwrap();
    while tokens.len() <= 3 * ctx.n_batch() as usize {
        tokens.extend_from_within(1..);
    }
    tokens.truncate(3 * ctx.n_batch() as usize + 5);

    ctx.eval(&tokens, 0, 0).unwrap();
    let logits = ctx.logits().unwrap();
    assert_eq!(logits.len(), model.n_vocab() as usize);
    assert!(logits.iter().all(|l| !l.is_nan()));

    // The window continues right after the chunked prefill.
    ctx.eval(&tokens[1..2], tokens.len() as i32, 0).unwrap();
}

#[test]
fn size_query_matches_fill() {
    let Some(path) = model_path() else { return };
    let model = load(&path);
    let text = b"The quick brown fox jumps over the lazy dog.";

    let n = tokenize_into(&model, text, true, None);
    assert!(n > 0);

    let mut exact = vec![0; n as usize];
    assert_eq!(tokenize_into(&model, text, true, Some(&mut exact)), n);

    // An empty buffer is a size query, not a fill.
    let mut empty: [i32; 0] = [];
    assert_eq!(tokenize_into(&model, text, true, Some(&mut empty)), n);

    // Too small: nothing usable, negated requirement returned.
    if n > 1 {
        let mut short = vec![0; 1];
        assert_eq!(tokenize_into(&model, text, true, Some(&mut short)), -n);
    }
}

#[test]
fn pieces_reassemble_text() {
    let Some(path) = model_path() else { return };
    let model = load(&path);
    let text = "hello world, café";
    let tokens = tokenize(&model, text, false).unwrap();
    let rebuilt = detokenize(&model, &tokens);
    assert!(rebuilt.trim_start().contains("hello world"), "{rebuilt:?}");
}

#[test]
fn short_piece_buffer_truncates() {
    let Some(path) = model_path() else { return };
    let model = load(&path);
    let tokens = tokenize(&model, " internationalization", false).unwrap();
    let token = tokens[0];
    let full = token_to_bytes(&model, token);

    let mut exact = vec![0u8; full.len()];
    assert_eq!(token_to_piece_into(&model, token, &mut exact), full.len() as i32);
    assert_eq!(exact, full);

    if full.len() > 1 {
        let mut short = vec![0u8; 1];
        assert_eq!(token_to_piece_into(&model, token, &mut short), 1);
        assert_eq!(short[0], full[0]);
    }
}

#[test]
fn eos_is_stable() {
    let Some(path) = model_path() else { return };
    let model = load(&path);
    assert_eq!(model.token_eos(), model.token_eos());
}

#[test]
fn overflow_and_empty_input_are_rejected() {
    let Some(path) = model_path() else { return };
    let model = load(&path);
    let mut ctx = LlamaContext::new(model, &ContextParams::new(32, 2)).unwrap();
    let n_ctx = ctx.n_ctx() as i32;

    assert!(matches!(ctx.eval(&[], 0, 0), Err(LlamaError::EmptyInput)));
    assert!(matches!(
        ctx.eval(&[1, 2], n_ctx - 1, 0),
        Err(LlamaError::ContextOverflow { .. })
    ));
    assert!(matches!(
        ctx.eval(&[1], -1, 0),
        Err(LlamaError::ContextOverflow { .. })
    ));
}

#[test]
fn session_completes_with_bounded_length() {
    let Some(path) = model_path() else { return };
    let config = EngineConfig {
        model_path: Some(path),
        n_gpu_layers: 0,
        ctx_size: 256,
        threads: 2,
        max_new_tokens: 8,
        sampling: SamplingParams::greedy(),
        ..EngineConfig::default()
    };
    let mut session = Session::open(backend(), config).unwrap();
    let done = session.complete("Once upon a time").unwrap();
    assert!(done.completion_tokens <= 8);
    assert!(done.prompt_tokens >= 1);
    assert!(matches!(
        done.finish_reason,
        FinishReason::Stop | FinishReason::Length | FinishReason::StopWord(_)
    ));

    // Greedy decoding from a cleared window repeats itself.
    let again = session.complete("Once upon a time").unwrap();
    assert_eq!(again.text, done.text);

    // A chat transcript runs through the same window.
    let reply = session
        .chat(&[ChatMessage::user("Say hi.")], &[], &FunctionCallMode::default())
        .unwrap();
    assert!(reply.prompt_tokens > done.prompt_tokens);
    assert!(reply.completion_tokens <= 8);
}

#[tokio::test(flavor = "multi_thread")]
async fn session_streams_until_done() {
    let Some(path) = model_path() else { return };
    let config = EngineConfig {
        model_path: Some(path),
        n_gpu_layers: 0,
        ctx_size: 256,
        threads: 2,
        max_new_tokens: 4,
        sampling: SamplingParams::greedy(),
        ..EngineConfig::default()
    };
    let session = Session::open(backend(), config).unwrap();
    let (mut rx, handle) = session.stream("The capital of France is").unwrap();

    let mut saw_done = false;
    while let Some(event) = rx.recv().await {
        match event {
            GenerateEvent::Token(_) => {}
            GenerateEvent::Done { completion_tokens, .. } => {
                assert!(completion_tokens <= 4);
                saw_done = true;
            }
            GenerateEvent::Error(e) => panic!("generation error: {e}"),
        }
    }
    assert!(saw_done);
    let session = handle.await.unwrap();
    assert_eq!(session.config().max_new_tokens, 4);
}
