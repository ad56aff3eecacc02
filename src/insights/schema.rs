diesel::table! {
    insights (id) {
        id -> Integer,
        user_id -> Integer,
        insight_type -> Text,
        title -> Text,
        body -> Text,
        reasoning -> Text,
        confidence -> Double,
        urgency -> Text,
        impact -> Text,
        actions -> Text,
        trigger_label -> Text,
        status -> Text,
        created_at -> BigInt,
        delivered_at -> Nullable<BigInt>,
        resolved_at -> Nullable<BigInt>,
    }
}
