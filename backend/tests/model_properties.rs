//! Property tests for bucket and period invariants.

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use glycemic_summary::models::{
    calculate_wall_minutes, Bucket, BucketData, DatumKind, GlucoseDatum, GlucoseUnits, Period,
    SummaryType, UpdateOptions,
};

fn hour_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 20, 14, 0, 0).unwrap()
}

fn datum(kind: DatumKind, minute: i64, value_mmol: f64, latency_hours: i64) -> GlucoseDatum {
    let time = hour_start() + Duration::minutes(minute);
    GlucoseDatum {
        user_id: "prop-user".to_string(),
        device_id: "DexG6-prop".to_string(),
        kind,
        time,
        created_time: time + Duration::hours(latency_hours),
        modified_time: time,
        value: value_mmol,
        units: GlucoseUnits::MmolL,
    }
}

fn fill(typ: SummaryType, readings: &[(i64, f64, i64, bool)]) -> Bucket {
    let mut bucket = Bucket::new("prop-user", typ, hour_start());
    let opts = UpdateOptions::default();
    let mut sorted = readings.to_vec();
    sorted.sort_by_key(|r| r.0);
    for (minute, value, latency, smbg) in sorted {
        let kind = if smbg { DatumKind::Smbg } else { DatumKind::Cbg };
        bucket.update(&datum(kind, minute, value, latency), &opts).unwrap();
    }
    bucket
}

fn readings() -> impl Strategy<Value = Vec<(i64, f64, i64, bool)>> {
    prop::collection::vec((0i64..60, 1.0f64..30.0, 0i64..72, any::<bool>()), 0..40)
}

proptest! {
    #[test]
    fn glucose_bins_partition_total(readings in readings()) {
        for typ in [SummaryType::Cgm, SummaryType::Bgm] {
            let bucket = fill(typ, &readings);
            match &bucket.data {
                BucketData::Glucose(ranges) => {
                    prop_assert_eq!(ranges.total.records, ranges.binned_records());
                }
                BucketData::Continuous(_) => prop_assert!(false, "glucose bucket expected"),
            }
        }
    }

    #[test]
    fn continuous_total_is_realtime_plus_deferred(readings in readings()) {
        let bucket = fill(SummaryType::Continuous, &readings);
        match &bucket.data {
            BucketData::Continuous(ranges) => {
                prop_assert_eq!(
                    ranges.total.records,
                    ranges.realtime.records + ranges.deferred.records
                );
            }
            BucketData::Glucose(_) => prop_assert!(false, "continuous bucket expected"),
        }
    }

    #[test]
    fn cgm_minutes_never_exceed_the_hour(readings in readings()) {
        let bucket = fill(SummaryType::Cgm, &readings);
        if let BucketData::Glucose(ranges) = &bucket.data {
            prop_assert!(ranges.total.minutes <= 60);
            prop_assert_eq!(ranges.total.minutes, ranges.total.records * 5);
        }
    }

    #[test]
    fn readding_a_bucket_leaves_period_unchanged(readings in readings()) {
        let bucket = fill(SummaryType::Cgm, &readings);
        let mut period = Period::new(SummaryType::Cgm);
        period.update(&bucket).unwrap();
        let before = period.total_records();

        prop_assert!(period.update(&bucket).is_err());
        prop_assert_eq!(period.total_records(), before);
    }

    #[test]
    fn one_day_wall_minutes_stay_within_a_day(
        minute in 0i64..60,
        interval in prop::sample::select(vec![5i64, 15]),
    ) {
        let last = hour_start() + Duration::minutes(minute);
        let wall = calculate_wall_minutes(1, last, interval);
        prop_assert!(wall <= 1440.0);
        prop_assert!(wall >= 1440.0 - 60.0);
        prop_assert_eq!(calculate_wall_minutes(7, last, interval), 7.0 * 1440.0);
    }
}
