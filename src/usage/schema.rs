diesel::table! {
    usage_records (id) {
        id -> Integer,
        user_id -> Integer,
        feature -> Text,
        count -> BigInt,
        period_start -> BigInt,
        period_end -> BigInt,
    }
}
