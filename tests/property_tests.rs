//! Property-based tests for the noise injector, distance metrics and
//! multiple-comparison corrections

use proptest::prelude::*;
use semdrift::embedding::{EmbeddingConfig, EmbeddingEngine};
use semdrift::noise::NoiseInjector;
use semdrift::stats::CorrectionMethod;

fn sentence() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-zA-Z]{1,9}[.,!]?", 1..15).prop_map(|words| words.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_level_zero_is_identity(text in sentence(), seed in any::<u64>()) {
        let out = NoiseInjector::new().inject(&text, 0, seed).unwrap();
        prop_assert_eq!(out, text);
    }

    #[test]
    fn prop_injection_is_deterministic(text in sentence(), level in 0i64..=100, seed in any::<u64>()) {
        let injector = NoiseInjector::new();
        let a = injector.inject(&text, level, seed).unwrap();
        let b = injector.inject(&text, level, seed).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_injection_preserves_word_count(text in sentence(), level in 0i64..=100, seed in any::<u64>()) {
        let out = NoiseInjector::new().inject(&text, level, seed).unwrap();
        prop_assert_eq!(
            out.split_whitespace().count(),
            text.split_whitespace().count()
        );
    }

    #[test]
    fn prop_full_noise_changes_every_word(
        words in prop::collection::vec("[a-z]{2,8}", 1..12),
        seed in any::<u64>()
    ) {
        let text = words.join(" ");
        let out = NoiseInjector::new().inject(&text, 100, seed).unwrap();
        for (before, after) in text.split(' ').zip(out.split(' ')) {
            prop_assert_ne!(before, after);
        }
    }

    #[test]
    fn prop_out_of_range_levels_rejected(level in prop_oneof![i64::MIN..0, 101i64..i64::MAX]) {
        prop_assert!(NoiseInjector::new().inject("some text", level, 1).is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_cosine_identity_and_symmetry(a in sentence(), b in sentence()) {
        let engine = EmbeddingEngine::new();
        let matrix = engine.embed(&[a.as_str(), b.as_str()], &EmbeddingConfig::default()).unwrap();
        let (ra, rb) = (matrix.row(0).unwrap(), matrix.row(1).unwrap());

        prop_assert_eq!(engine.cosine_distance(ra, ra).unwrap(), 0.0);
        let ab = engine.cosine_distance(ra, rb).unwrap();
        let ba = engine.cosine_distance(rb, ra).unwrap();
        prop_assert!((ab - ba).abs() < 1e-6);
        prop_assert!((0.0..=2.0).contains(&ab));
    }

    #[test]
    fn prop_text_metrics_bounded(a in sentence(), b in sentence()) {
        let engine = EmbeddingEngine::new();
        let overlap = engine.word_overlap(&a, &b).unwrap();
        prop_assert!((0.0..=1.0).contains(&overlap));
        prop_assert_eq!(overlap, engine.word_overlap(&b, &a).unwrap());
        prop_assert_eq!(engine.word_overlap(&a, &a).unwrap(), 1.0);

        let similarity = engine.text_similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&similarity));
        prop_assert_eq!(engine.text_similarity(&a, &a), 1.0);
    }

    #[test]
    fn prop_corrected_p_never_below_raw(p in prop::collection::vec(0.0f64..=1.0, 0..30)) {
        for method in CorrectionMethod::ALL {
            let corrected = method.apply(&p);
            prop_assert_eq!(corrected.len(), p.len());
            for (adj, raw) in corrected.iter().zip(&p) {
                prop_assert!(adj >= raw);
                prop_assert!(*adj <= 1.0);
            }
        }
    }
}
