//! Integration tests for the stimulus -> generation -> coalesce -> DGRC pipeline
//!
//! Note: Tests marked with #[ignore] require model download.
//! Run them explicitly with: cargo test --ignored

use anyhow::Result;
use rejection_lm::coalesce::{coalesced_path, read_preprocess};
use rejection_lm::collect::SentenceEntry;
use rejection_lm::stimuli::{rejection_table_path, unique_table_path};
use rejection_lm::{
    build_stimuli, coalesce_all, coalesce_model_dir, collect_generations, evaluate_plain,
    evaluate_rejection, load_items, write_stimuli, ChatFormat, CoalesceOptions, CoalescedRow,
    CollectOptions, Construction, DedupPolicy, GenerationCondition, GenerationParams,
    GenerationResults, LanguageModel, RejectionHeader, StimulusMetadata, VpType,
};
use std::fs;
use std::path::Path;

const ITEMS_CSV: &str = "subj,vp1,vp2,verb1,verb2,prn,name1,name2\n\
The teacher,likes the student,hates the principal,likes,hates,she,Mary,John\n";

/// Deterministic stand-in: numbered continuations, every sequence scores 0.5
struct FixedScoreModel;

impl LanguageModel for FixedScoreModel {
    fn model_id(&self) -> &str {
        "test/fixed-score"
    }

    fn chat_format(&self) -> Option<ChatFormat> {
        None
    }

    fn generate(
        &self,
        prompts: &[String],
        params: &GenerationParams,
        _seed: u64,
    ) -> Result<Vec<Vec<String>>> {
        Ok(prompts
            .iter()
            .map(|_| {
                (0..params.num_generations)
                    .map(|i| format!(" Reply {i}."))
                    .collect()
            })
            .collect())
    }

    fn sequence_score(&self, texts: &[String], _bow_correction: bool) -> Result<Vec<f64>> {
        Ok(vec![0.5; texts.len()])
    }
}

fn write_items(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("items.csv");
    fs::write(&path, ITEMS_CSV).unwrap();
    path
}

fn results_with(vp1: Vec<(String, f64)>) -> GenerationResults {
    GenerationResults {
        model: "test/fixed-score".into(),
        instruct: false,
        top_p: None,
        top_k: 0,
        temperature: 1.0,
        num_generations: vp1.len(),
        max_gen: 20,
        response: None,
        generation_vp1: vec![SentenceEntry {
            idx: 1,
            sentences: vp1,
        }],
        generation_vp2: vec![],
    }
}

/// Stimulus tables for the single test item
fn setup_stimuli(dir: &Path) -> StimulusMetadata {
    let items = load_items(write_items(dir)).unwrap();
    let stimuli_dir = dir.join("stimuli");
    write_stimuli(&build_stimuli(&items), &stimuli_dir, "kim22").unwrap();
    StimulusMetadata::load(&stimuli_dir, "kim22").unwrap()
}

#[test]
fn test_end_to_end_single_item() {
    let dir = tempfile::tempdir().unwrap();
    let items = load_items(write_items(dir.path())).unwrap();

    // stimuli: 2 unique + 32 rejection rows per construction
    let stimuli_dir = dir.path().join("stimuli");
    let tables = build_stimuli(&items);
    write_stimuli(&tables, &stimuli_dir, "kim22").unwrap();
    for construction in Construction::ALL {
        let unique: Vec<UniqueRowColumns> =
            rejection_lm::io::read_csv(unique_table_path(&stimuli_dir, "kim22", construction))
                .unwrap();
        assert_eq!(unique.len(), 2);
        let rejection_rows = fs::read_to_string(rejection_table_path(
            &stimuli_dir,
            "kim22",
            construction,
        ))
        .unwrap();
        assert_eq!(rejection_rows.lines().count(), 33);
    }

    // generation: one entry per vp per item, every score 0.5
    let options = CollectOptions {
        params: GenerationParams {
            num_generations: 1,
            ..Default::default()
        },
        ..Default::default()
    };
    let results = collect_generations(&FixedScoreModel, &items, &options).unwrap();
    assert_eq!(results.generation_vp1.len(), 1);
    assert_eq!(results.generation_vp2.len(), 1);
    assert_eq!(results.generation_vp1[0].sentences[0].1, 0.5);

    let model_dir = dir.path().join("generations").join("fixed-score");
    rejection_lm::io::write_json(model_dir.join(options.default_output_name()), &results)
        .unwrap();

    // coalesce: one continuation per (item, vp), fanned out to both swap states
    let metadata = StimulusMetadata::load(&stimuli_dir, "kim22").unwrap();
    let sorted_dir = dir.path().join("sorted");
    let written = coalesce_all(
        &dir.path().join("generations"),
        &metadata,
        &sorted_dir,
        &CoalesceOptions::default(),
    )
    .unwrap();
    // rejection condition has no files and is skipped
    assert_eq!(written.len(), 2);

    let arc_path = coalesced_path(
        &sorted_dir,
        GenerationCondition::Freeform,
        "fixed-score",
        Construction::Arc,
    );
    let rows: Vec<CoalescedRow> = rejection_lm::io::read_csv(&arc_path).unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0].continuation_type, VpType::Vp1);
    assert_eq!(rows[0].continuation, "Reply 0.");
    assert!(!rows[0].swapped && rows[1].swapped);
    assert_eq!(rows[2].continuation_type, VpType::Vp2);

    // DGRC: one score per row, in order
    let scores = evaluate_plain(&FixedScoreModel, &rows, false, 3).unwrap();
    assert_eq!(scores.len(), rows.len());
    assert!(scores.iter().all(|s| s.score == 0.5));
}

/// Unique-table columns only, to check the stimulus files parse on their own
#[derive(serde::Deserialize)]
#[allow(dead_code)]
struct UniqueRowColumns {
    item: usize,
    swapped: String,
    #[serde(rename = "type")]
    construction: String,
    preamble: String,
}

#[test]
fn test_dedup_across_files() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = setup_stimuli(dir.path());

    let model_dir = dir.path().join("generations").join("m");
    let shared = vec![("Same reply.".to_string(), -2.0)];
    rejection_lm::io::write_json(
        model_dir.join("freeform_pnone_k0_t1.json"),
        &results_with(shared.clone()),
    )
    .unwrap();
    rejection_lm::io::write_json(model_dir.join("freeform_p0.9_k0_t1.json"), &results_with(shared))
        .unwrap();

    let out = dir.path().join("sorted");
    coalesce_model_dir(&model_dir, &metadata, &out, &CoalesceOptions::default()).unwrap();

    let rows: Vec<CoalescedRow> = rejection_lm::io::read_csv(coalesced_path(
        &out,
        GenerationCondition::Freeform,
        "m",
        Construction::Coord,
    ))
    .unwrap();
    // one continuation, two swap states
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.continuation_id == 1));
}

#[test]
fn test_truncation_to_top_ten() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = setup_stimuli(dir.path());

    let model_dir = dir.path().join("generations").join("m");
    let sentences: Vec<(String, f64)> = (0..15)
        .map(|i| (format!("reply {i:02}"), -f64::from(i)))
        .collect();
    rejection_lm::io::write_json(
        model_dir.join("rejection_pnone_k0_t1.json"),
        &results_with(sentences),
    )
    .unwrap();

    let out = dir.path().join("sorted");
    let written =
        coalesce_model_dir(&model_dir, &metadata, &out, &CoalesceOptions::default()).unwrap();
    assert_eq!(written.len(), 2);

    let rows: Vec<CoalescedRow> = rejection_lm::io::read_csv(coalesced_path(
        &out,
        GenerationCondition::Rejection,
        "m",
        Construction::Arc,
    ))
    .unwrap();
    let unswapped: Vec<_> = rows.iter().filter(|r| !r.swapped).collect();
    assert_eq!(unswapped.len(), 10);
    for (rank, row) in unswapped.iter().enumerate() {
        assert_eq!(row.continuation_id, rank + 1);
        assert_eq!(row.continuation, format!("reply {rank:02}"));
    }
}

#[test]
fn test_text_only_dedup_option() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = setup_stimuli(dir.path());

    let model_dir = dir.path().join("generations").join("m");
    rejection_lm::io::write_json(
        model_dir.join("freeform_a.json"),
        &results_with(vec![("Sure.".into(), -1.0)]),
    )
    .unwrap();
    rejection_lm::io::write_json(
        model_dir.join("freeform_b.json"),
        &results_with(vec![("Sure.".into(), -1.25)]),
    )
    .unwrap();

    let out = dir.path().join("sorted");
    let options = CoalesceOptions {
        dedup: DedupPolicy::TextOnly,
        ..Default::default()
    };
    coalesce_model_dir(&model_dir, &metadata, &out, &options).unwrap();
    let rows: Vec<CoalescedRow> = rejection_lm::io::read_csv(coalesced_path(
        &out,
        GenerationCondition::Freeform,
        "m",
        Construction::Arc,
    ))
    .unwrap();
    assert_eq!(rows.len(), 2);

    // exact dedup keeps both scores
    coalesce_model_dir(&model_dir, &metadata, &out, &CoalesceOptions::default()).unwrap();
    let rows: Vec<CoalescedRow> = rejection_lm::io::read_csv(coalesced_path(
        &out,
        GenerationCondition::Freeform,
        "m",
        Construction::Arc,
    ))
    .unwrap();
    assert_eq!(rows.len(), 4);
}

#[test]
fn test_invalid_json_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = setup_stimuli(dir.path());

    let model_dir = dir.path().join("generations").join("m");
    fs::create_dir_all(&model_dir).unwrap();
    fs::write(model_dir.join("freeform_broken.json"), "{ not json").unwrap();
    rejection_lm::io::write_json(
        model_dir.join("freeform_ok.json"),
        &results_with(vec![("Fine.".into(), -1.0)]),
    )
    .unwrap();

    let written = coalesce_model_dir(
        &model_dir,
        &metadata,
        &dir.path().join("sorted"),
        &CoalesceOptions::default(),
    )
    .unwrap();
    assert_eq!(written.len(), 2);
}

#[test]
fn test_empty_condition_writes_headed_tables() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = setup_stimuli(dir.path());

    let model_dir = dir.path().join("generations").join("m");
    let mut results = results_with(vec![]);
    results.generation_vp1.clear();
    rejection_lm::io::write_json(model_dir.join("freeform_empty.json"), &results).unwrap();

    let written = coalesce_model_dir(
        &model_dir,
        &metadata,
        &dir.path().join("sorted"),
        &CoalesceOptions::default(),
    )
    .unwrap();
    assert_eq!(written.len(), 2);

    for path in &written {
        let content = fs::read_to_string(path).unwrap();
        assert_eq!(
            content,
            "item,swapped,type,name1,name2,preamble,continuation_type,continuation_id,continuation\n"
        );
        let rows: Vec<CoalescedRow> = rejection_lm::io::read_csv(path).unwrap();
        assert!(rows.is_empty());
        assert!(evaluate_plain(&FixedScoreModel, &rows, false, 8)
            .unwrap()
            .is_empty());
    }
}

#[test]
fn test_missing_metadata_fails() {
    let dir = tempfile::tempdir().unwrap();
    let metadata = setup_stimuli(dir.path());

    let model_dir = dir.path().join("generations").join("m");
    let mut results = results_with(vec![("Hm.".into(), -1.0)]);
    results.generation_vp1[0].idx = 42;
    rejection_lm::io::write_json(model_dir.join("freeform.json"), &results).unwrap();

    let err = coalesce_model_dir(
        &model_dir,
        &metadata,
        &dir.path().join("sorted"),
        &CoalesceOptions::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("item 42"));
}

#[test]
fn test_json_round_trip_through_preprocessing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("freeform.json");
    let mut results = results_with(vec![("a".into(), -1.0), ("b".into(), -2.5)]);
    results.generation_vp1.push(SentenceEntry {
        idx: 1,
        sentences: vec![("c".into(), -0.5)],
    });
    results.generation_vp2.push(SentenceEntry {
        idx: 2,
        sentences: vec![("d".into(), -3.0)],
    });
    rejection_lm::io::write_json(&path, &results).unwrap();

    let reread: GenerationResults = rejection_lm::io::read_json(&path).unwrap();
    assert_eq!(reread, results);

    let grouped = read_preprocess(&path).unwrap();
    assert_eq!(
        grouped[&VpType::Vp1][&1],
        vec![
            ("a".to_string(), -1.0),
            ("b".to_string(), -2.5),
            ("c".to_string(), -0.5)
        ]
    );
    assert_eq!(grouped[&VpType::Vp2][&2], vec![("d".to_string(), -3.0)]);
}

#[test]
fn test_missing_json_is_none() {
    let dir = tempfile::tempdir().unwrap();
    assert!(read_preprocess(dir.path().join("absent.json")).is_none());
}

#[test]
fn test_rejection_eval_alternates_headers() {
    let row = |continuation: &str| CoalescedRow {
        item: 1,
        swapped: false,
        construction: Construction::Arc,
        name1: "Mary".into(),
        name2: "John".into(),
        preamble: "The teacher, who likes the student, hates the principal.".into(),
        continuation_type: VpType::Vp1,
        continuation_id: 1,
        continuation: continuation.into(),
    };
    let rows = vec![row("a"), row("b"), row("c")];

    let scores = evaluate_rejection(&FixedScoreModel, &rows, false, 4).unwrap();
    assert_eq!(scores.len(), 6);
    for (i, score) in scores.iter().enumerate() {
        let expected = if i % 2 == 0 {
            RejectionHeader::No
        } else {
            RejectionHeader::Wait
        };
        assert_eq!(score.header, expected);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scores.csv");
    rejection_lm::io::write_csv(&path, &scores).unwrap();
    let content = fs::read_to_string(&path).unwrap();
    assert!(content.starts_with("header,score\nno,0.5\nwait,0.5\n"));
}

#[test]
fn test_instruct_without_chat_format_fails() {
    let dir = tempfile::tempdir().unwrap();
    let items = load_items(write_items(dir.path())).unwrap();
    let options = CollectOptions {
        instruct: true,
        ..Default::default()
    };
    let err = collect_generations(&FixedScoreModel, &items, &options).unwrap_err();
    assert!(err.to_string().contains("test/fixed-score"));
}

/// Sampling and scoring with a real checkpoint
#[test]
#[ignore = "requires model download"]
fn test_smollm2_generate_and_score() {
    use rejection_lm::CausalLm;

    let model = CausalLm::from_pretrained(
        "HuggingFaceTB/SmolLM2-135M-Instruct",
        candle_core::Device::Cpu,
    )
    .unwrap();
    assert_eq!(model.chat_format(), Some(ChatFormat::ChatMl));

    let params = GenerationParams {
        num_generations: 2,
        max_new_tokens: 8,
        ..Default::default()
    };
    let prompts = vec!["Mary said, \"The teacher likes the student\", and John replied, \"".to_string()];
    let first = model.generate(&prompts, &params, 1024).unwrap();
    let second = model.generate(&prompts, &params, 1024).unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].len(), 2);

    let texts = vec![
        "The teacher likes the student.".to_string(),
        "Student the likes teacher the.".to_string(),
    ];
    let plain = model.sequence_score(&texts, false).unwrap();
    let corrected = model.sequence_score(&texts, true).unwrap();
    assert!(plain.iter().chain(&corrected).all(|s| s.is_finite() && *s < 0.0));
    assert!(plain[0] > plain[1]);
}
