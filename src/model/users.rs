//! Users and their personal access tokens.

use super::{ColumnDef, KeyType, ModelDef, RelationDef, RelationKind};

pub static USERS: ModelDef = ModelDef {
    schema: "public",
    table: "users",
    primary_key: "id",
    key_type: KeyType::Uuid,
    columns: &[
        ColumnDef::new("id", "uuid"),
        ColumnDef::new("name", "text"),
        ColumnDef::new("email", "text"),
        ColumnDef::new("email_verified_at", "timestamptz"),
        ColumnDef::new("password", "text"),
        ColumnDef::new("remember_token", "text"),
        ColumnDef::new("created_at", "timestamptz"),
        ColumnDef::new("updated_at", "timestamptz"),
        ColumnDef::new("deleted_at", "timestamptz"),
    ],
    fillable: &["name", "email", "password"],
    hidden: &["password", "remember_token"],
    soft_deletes: true,
    timestamps: true,
    relations: &[RelationDef {
        name: "tokens",
        related: &PERSONAL_ACCESS_TOKENS,
        kind: RelationKind::HasMany {
            foreign_key: "tokenable_id",
            local_key: "id",
        },
    }],
    translations: None,
};

pub static PERSONAL_ACCESS_TOKENS: ModelDef = ModelDef {
    schema: "public",
    table: "personal_access_tokens",
    primary_key: "id",
    key_type: KeyType::Uuid,
    columns: &[
        ColumnDef::new("id", "uuid"),
        ColumnDef::new("tokenable_id", "uuid"),
        ColumnDef::new("name", "text"),
        ColumnDef::new("token", "text"),
        ColumnDef::new("abilities", "jsonb"),
        ColumnDef::new("last_used_at", "timestamptz"),
        ColumnDef::new("created_at", "timestamptz"),
        ColumnDef::new("updated_at", "timestamptz"),
    ],
    fillable: &["tokenable_id", "name", "token", "abilities"],
    hidden: &["token"],
    soft_deletes: false,
    timestamps: true,
    relations: &[],
    translations: None,
};
