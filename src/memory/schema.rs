diesel::table! {
    user_memory (id) {
        id -> Integer,
        user_id -> Integer,
        key -> Text,
        value -> Text,
        source -> Text,
        confidence -> Double,
        created_at -> BigInt,
        last_updated -> BigInt,
    }
}
