use alphaload_engine::partition::{format_yyyymmdd, parse_yyyymmdd};
use alphaload_engine::{aggregate, BySize, PartitionStrategy, SmartTimePartition};
use alphaload_types::{BatchOutcome, BatchStage};
use chrono::{Days, NaiveDate};
use proptest::prelude::*;

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1995, 1, 1).unwrap()
}

fn outcome() -> impl Strategy<Value = BatchOutcome> {
    prop_oneof![
        (0_u64..1_000).prop_map(BatchOutcome::Success),
        Just(BatchOutcome::NoData),
        "[a-z]{1,8}".prop_map(|msg| BatchOutcome::failure(BatchStage::Fetch, msg)),
        Just(BatchOutcome::Cancelled),
    ]
}

proptest! {
    #[test]
    fn by_size_flattens_back_to_input(items in prop::collection::vec(any::<u16>(), 0..200), size in 1_usize..40) {
        let batches = BySize::new(size).unwrap().partition(&items).unwrap();
        prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
        let flattened: Vec<u16> = batches.into_iter().flatten().collect();
        prop_assert_eq!(flattened, items);
    }

    #[test]
    fn smart_time_buckets_are_contiguous(offset in 0_u64..10_000, span in 0_u64..6_000) {
        let start = base_date() + Days::new(offset);
        let end = start + Days::new(span);
        let batches = SmartTimePartition
            .partition(&[format_yyyymmdd(start), format_yyyymmdd(end)])
            .unwrap();

        prop_assert!(!batches.is_empty());
        prop_assert_eq!(&batches[0][0], &format_yyyymmdd(start));
        prop_assert_eq!(&batches[batches.len() - 1][1], &format_yyyymmdd(end));
        if span <= 31 {
            prop_assert_eq!(batches.len(), 1);
        } else {
            prop_assert!(batches.len() >= 2);
        }

        let mut previous_end: Option<NaiveDate> = None;
        for batch in &batches {
            let from = parse_yyyymmdd(&batch[0]).unwrap();
            let to = parse_yyyymmdd(&batch[1]).unwrap();
            prop_assert!(from <= to);
            if let Some(prev) = previous_end {
                prop_assert_eq!(prev + Days::new(1), from);
            }
            previous_end = Some(to);
        }
    }

    #[test]
    fn aggregation_ignores_outcome_order(
        (outcomes, shuffled) in prop::collection::vec(outcome(), 0..30)
            .prop_flat_map(|v| (Just(v.clone()), Just(v).prop_shuffle()))
    ) {
        prop_assert_eq!(aggregate(&outcomes), aggregate(&shuffled));
    }
}
