diesel::table! {
    financial_profiles (user_id) {
        user_id -> Integer,
        age -> Nullable<Integer>,
        annual_income -> Nullable<Double>,
        monthly_expenses -> Nullable<Double>,
        total_savings -> Nullable<Double>,
        total_debt -> Nullable<Double>,
        risk_tolerance -> Nullable<Text>,
        investment_goals -> Nullable<Text>,
        portfolio_description -> Nullable<Text>,
        experience_level -> Nullable<Text>,
        investment_timeline -> Nullable<Text>,
        interested_topics -> Nullable<Text>,
        communication_level -> Nullable<Text>,
        advisor_tone -> Nullable<Text>,
    }
}

diesel::table! {
    financial_plans (id) {
        id -> Integer,
        user_id -> Integer,
        title -> Text,
        plan_type -> Text,
        status -> Text,
        summary -> Nullable<Text>,
        created_at -> BigInt,
    }
}

diesel::table! {
    price_alerts (id) {
        id -> Integer,
        user_id -> Integer,
        symbol -> Text,
        condition -> Text,
        target_price -> Double,
        is_active -> Bool,
        triggered -> Bool,
        created_at -> BigInt,
    }
}

diesel::table! {
    subscriptions (user_id) {
        user_id -> Integer,
        status -> Text,
        updated_at -> BigInt,
    }
}
