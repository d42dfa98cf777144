//! Importance methods on the fixture encoders.

use attribution_engine::methods::IntegratedGradients;
use attribution_engine::{
    AttributionError, AttributionTarget, Diagnostic, Method, Mode, SimilarityClassifier,
    SupportExample, SupportSet,
};
use attribution_test_utils::{bag_of_words_engine, engine_with, random_encoder, random_engine, test_config};

fn banking_support() -> SupportSet {
    SupportSet::new(vec![
        SupportExample::new("cancel my booking", "A"),
        SupportExample::new("track my package", "B"),
    ])
}

#[test]
fn test_every_method_returns_one_score_per_token() {
    let engine = random_engine();
    let support = banking_support();
    let target = AttributionTarget::default()
        .with_reference("track my package")
        .with_support_set(&support);

    for text in ["please cancel my order", "where is my package", "hello"] {
        for method in Method::ALL {
            let attribution = engine.importance(method, text, &target).unwrap();
            println!(
                "{} / {}: tokens={:?} importance={:?}",
                method, text, attribution.tokens, attribution.importance
            );
            assert_eq!(attribution.method, method);
            assert_eq!(attribution.tokens.len(), attribution.importance.len());
            assert!(!attribution.tokens.is_empty());
            assert!(attribution.importance.iter().all(|v| v.is_finite()));
            assert!(!attribution.tokens.iter().any(|t| t == "[CLS]" || t == "[SEP]"));
        }
    }
}

#[test]
fn test_word_pieces_are_scored_individually() {
    let engine = random_engine();
    let attribution = engine
        .importance(Method::Attention, "bookings", &AttributionTarget::default())
        .unwrap();
    assert_eq!(attribution.tokens, vec!["booking", "##s"]);
    assert_eq!(attribution.importance.len(), 2);
}

#[test]
fn test_attention_is_deterministic_and_non_negative() {
    let engine = random_engine();
    let target = AttributionTarget::default();

    let first = engine
        .importance(Method::Attention, "i want to book a flight", &target)
        .unwrap();
    let second = engine
        .importance(Method::Attention, "i want to book a flight", &target)
        .unwrap();

    println!("BEFORE: {:?}", first.importance);
    println!("AFTER: {:?}", second.importance);

    let bits = |v: &[f32]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&first.importance), bits(&second.importance));
    assert!(first.importance.iter().all(|&v| v >= 0.0));
}

#[test]
fn test_attention_received_bounded_by_sequence_length() {
    // Each query row sums to 1, so the average received attention over all
    // positions (boundaries included) is exactly 1.
    let engine = random_engine();
    let attribution = engine
        .importance(Method::Attention, "cancel my order", &AttributionTarget::default())
        .unwrap();
    let seq_len = attribution.tokens.len() + 2;
    let content: f32 = attribution.importance.iter().sum();
    assert!(content > 0.0);
    assert!(content <= seq_len as f32 + 1e-4);
}

#[test]
fn test_gradient_scores_are_magnitudes() {
    let engine = random_engine();
    for target in [
        AttributionTarget::default(),
        AttributionTarget::default().with_reference("cancel my booking"),
    ] {
        let attribution = engine
            .importance(Method::Gradient, "please cancel my order", &target)
            .unwrap();
        assert!(attribution.importance.iter().all(|&v| v >= 0.0));
        assert!(attribution.importance.iter().any(|&v| v > 0.0));
    }
}

#[test]
fn test_integrated_gradients_completeness() {
    let engine = random_engine();
    let adapter = engine.adapter();
    let ctx = engine.context(&adapter);

    let tokenized = ctx.tokenize("please cancel my order").unwrap();
    let reference = ctx.reference_encoding("cancel my booking").unwrap();

    for reference in [None, Some(&reference)] {
        let outcome = IntegratedGradients::attribute(&ctx, &tokenized, reference).unwrap();
        let gap = outcome.target_input - outcome.target_baseline;
        println!(
            "contrastive={} gap={} delta={} importance={:?}",
            reference.is_some(),
            gap,
            outcome.delta,
            outcome.importance
        );

        assert!(
            outcome.delta.abs() <= 1e-2 * gap.abs().max(1.0),
            "delta {} too large for gap {}",
            outcome.delta,
            gap
        );
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(outcome.importance.len(), tokenized.content_len());
        assert_eq!(adapter.mode(), Mode::None);
    }
}

#[test]
fn test_integrated_gradients_target_matches_forward() {
    let engine = random_engine();
    let adapter = engine.adapter();
    let ctx = engine.context(&adapter);
    let tokenized = ctx.tokenize("track my package").unwrap();

    let pooled_sum: f32 = adapter
        .pooled(&tokenized)
        .unwrap()
        .sum_all()
        .unwrap()
        .to_scalar()
        .unwrap();
    let outcome = IntegratedGradients::attribute(&ctx, &tokenized, None).unwrap();
    assert!((outcome.target_input - pooled_sum).abs() < 1e-4);
}

#[test]
fn test_integrated_gradients_reports_delta() {
    let engine = random_engine();
    let attribution = engine
        .importance(Method::Integrad, "book a flight", &AttributionTarget::default())
        .unwrap();
    assert!(attribution.convergence_delta.is_some());
    assert!(attribution.surrogate.is_none());
}

#[test]
fn test_too_few_steps_flags_non_convergence() {
    let mut config = test_config();
    config.integrated.n_steps = 2;
    config.integrated.convergence_tolerance = 1e-7;
    let engine = engine_with(random_encoder(42), config);

    let attribution = engine
        .importance(
            Method::Integrad,
            "please cancel my order",
            &AttributionTarget::default().with_reference("track my package"),
        )
        .unwrap();
    println!("AFTER: diagnostics = {:?}", attribution.diagnostics);
    assert!(attribution
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::NumericalNonConvergence { .. })));
}

#[test]
fn test_truncation_diagnostic() {
    let mut config = test_config();
    config.encoder.max_tokens = 6;
    let engine = engine_with(random_encoder(42), config);
    let text = "i want to cancel my order please";

    for method in [Method::Attention, Method::Gradient, Method::Integrad] {
        let attribution = engine
            .importance(method, text, &AttributionTarget::default())
            .unwrap();
        assert_eq!(attribution.tokens, vec!["i", "want", "to", "cancel"]);
        assert_eq!(attribution.importance.len(), 4);
        assert!(attribution.diagnostics.contains(&Diagnostic::Truncated {
            original: 7,
            kept: 4
        }));
    }
}

#[test]
fn test_empty_input_rejected() {
    let engine = random_engine();
    let result = engine.importance(Method::Attention, "   ", &AttributionTarget::default());
    assert!(matches!(result, Err(AttributionError::EmptyInput)));
}

#[test]
fn test_lime_requires_support_set() {
    let engine = random_engine();
    let adapter = engine.adapter();

    let result = engine.importance_with(
        &adapter,
        Method::Lime,
        "please cancel my order",
        &AttributionTarget::default(),
    );
    assert!(matches!(
        result,
        Err(AttributionError::MissingSupportSet { method: "lime" })
    ));
    assert_eq!(adapter.mode(), Mode::None);

    let empty = SupportSet::default();
    let result = engine.importance(
        Method::Lime,
        "please cancel my order",
        &AttributionTarget::default().with_support_set(&empty),
    );
    assert!(matches!(result, Err(AttributionError::MissingSupportSet { .. })));
}

#[test]
fn test_mode_is_none_after_every_method() {
    let engine = random_engine();
    let adapter = engine.adapter();
    let support = banking_support();
    let target = AttributionTarget::default()
        .with_reference("cancel my booking")
        .with_support_set(&support);

    for method in Method::ALL {
        println!("BEFORE {}: mode = {}", method, adapter.mode());
        engine
            .importance_with(&adapter, method, "please cancel my order", &target)
            .unwrap();
        println!("AFTER {}: mode = {}", method, adapter.mode());
        assert_eq!(adapter.mode(), Mode::None);
    }
}

#[test]
fn test_mode_reset_on_error_path() {
    let engine = random_engine();
    let adapter = engine.adapter();
    let ctx = engine.context(&adapter);
    let tokenized = ctx.tokenize("book a flight").unwrap();

    let result = (|| {
        let _guard = adapter.enter(Mode::Integrad)?;
        adapter.forward_vanilla_grad(&tokenized)?;
        Ok::<_, AttributionError>(())
    })();

    assert!(matches!(
        result,
        Err(AttributionError::StaleModeState {
            expected: Mode::VanillaGrad,
            actual: Mode::Integrad
        })
    ));
    assert_eq!(adapter.mode(), Mode::None);
}

#[test]
fn test_modes_cannot_nest() {
    let engine = random_engine();
    let adapter = engine.adapter();
    let tokenized = engine.context(&adapter).tokenize("hello").unwrap();

    let guard = adapter.enter(Mode::VanillaGrad).unwrap();
    assert_eq!(guard.mode(), Mode::VanillaGrad);
    assert!(matches!(
        adapter.enter(Mode::Integrad),
        Err(AttributionError::StaleModeState { .. })
    ));
    assert!(matches!(
        adapter.encode(&tokenized, false),
        Err(AttributionError::StaleModeState {
            expected: Mode::None,
            actual: Mode::VanillaGrad
        })
    ));
    drop(guard);

    assert_eq!(adapter.mode(), Mode::None);
    assert!(adapter.encode(&tokenized, false).is_ok());
}

#[test]
fn test_lime_seed_reproducible() {
    let engine = random_engine();
    let support = banking_support();
    let target = AttributionTarget::default().with_support_set(&support);

    let first = engine
        .importance(Method::Lime, "please cancel my order", &target)
        .unwrap();
    let second = engine
        .importance(Method::Lime, "please cancel my order", &target)
        .unwrap();
    assert_eq!(first.importance, second.importance);
    assert!(first.surrogate.is_some());
}

#[test]
fn test_lime_independent_of_batch_size() {
    let support = banking_support();
    let target = AttributionTarget::default().with_support_set(&support);

    let mut small = test_config();
    small.classifier.batch_size = 3;
    let a = engine_with(random_encoder(42), small)
        .importance(Method::Lime, "please cancel my order", &target)
        .unwrap();
    let b = engine_with(random_encoder(42), test_config())
        .importance(Method::Lime, "please cancel my order", &target)
        .unwrap();

    for (x, y) in a.importance.iter().zip(&b.importance) {
        assert!((x - y).abs() < 1e-4, "{} vs {}", x, y);
    }
}

#[test]
fn test_lime_bounded_across_seeds() {
    let support = banking_support();
    let target = AttributionTarget::default().with_support_set(&support);

    let runs: Vec<Vec<f32>> = (1..=4)
        .map(|seed| {
            let mut config = test_config();
            config.perturbation.seed = Some(seed);
            engine_with(random_encoder(42), config)
                .importance(Method::Lime, "please cancel my order", &target)
                .unwrap()
                .importance
        })
        .collect();

    // Ridge with alpha = 1 on probabilities keeps every coefficient small.
    for run in &runs {
        println!("importance = {:?}", run);
        assert!(run.iter().all(|v| v.is_finite() && v.abs() <= 5.0));
    }
}

#[test]
fn test_lime_cancel_scenario() {
    let engine = bag_of_words_engine();
    let support = banking_support();
    let target = AttributionTarget::default().with_support_set(&support);

    for seed in [1u64, 7, 42] {
        let mut config = engine.config().clone();
        config.perturbation.seed = Some(seed);
        let engine = engine_with(engine.encoder().clone(), config);

        let attribution = engine
            .importance(Method::Lime, "please cancel my order", &target)
            .unwrap();
        println!(
            "seed {}: tokens={:?} importance={:?} surrogate={:?}",
            seed, attribution.tokens, attribution.importance, attribution.surrogate
        );

        let surrogate = attribution.surrogate.as_ref().unwrap();
        assert_eq!(surrogate.explained_index, 0);
        assert_eq!(surrogate.explained_label, "A");

        let top = attribution
            .importance
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(attribution.tokens[top], "cancel");
        assert!(attribution.importance[top] > 0.0);
    }
}

#[test]
fn test_classifier_probabilities() {
    let engine = bag_of_words_engine();
    let adapter = engine.adapter();
    let classifier = SimilarityClassifier::new(&adapter, engine.tokenizer(), &engine.config().classifier);
    let encoded = classifier.encode_support(&banking_support()).unwrap();

    let texts = ["please cancel my order", "where is my package", "hello"];
    let probabilities = classifier.classify(&texts, &encoded).unwrap();
    println!("probabilities = {:?}", probabilities);

    assert_eq!(probabilities.len(), 3);
    for row in &probabilities {
        assert_eq!(row.len(), 2);
        assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }
    assert!(probabilities[0][0] > probabilities[0][1]);
    assert!(probabilities[1][1] > probabilities[1][0]);

    let (closest, _) = classifier.closest("please cancel my order", &encoded).unwrap();
    assert_eq!(closest, 0);
}

#[test]
fn test_classifier_batching_preserves_rows() {
    let support = banking_support();
    let texts = ["please cancel my order", "track my package", "i want to book a flight", "hello"];

    let mut per_text = test_config();
    per_text.classifier.batch_size = 1;
    let single = engine_with(random_encoder(3), per_text);
    let batched = engine_with(random_encoder(3), test_config());

    let run = |engine: &attribution_engine::AttributionEngine| {
        let adapter = engine.adapter();
        let classifier = SimilarityClassifier::new(&adapter, engine.tokenizer(), &engine.config().classifier);
        let encoded = classifier.encode_support(&support).unwrap();
        classifier.classify(&texts, &encoded).unwrap()
    };

    for (a, b) in run(&single).iter().zip(run(&batched).iter()) {
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}
