diesel::table! {
    users (id) {
        id -> Int8,
        email -> Varchar,
        password_hash -> Text,
        role -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    idempotency_keys (id) {
        id -> Int8,
        key -> Varchar,
        method -> Varchar,
        path -> Varchar,
        user_id -> Nullable<Int8>,
        response_body -> Nullable<Jsonb>,
        status -> Nullable<Int4>,
        created_at -> Timestamptz,
    }
}
