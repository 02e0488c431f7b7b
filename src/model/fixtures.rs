//! Descriptors exercising every relation kind and a translations table.

use super::*;

pub static POSTS: ModelDef = ModelDef {
    schema: "blog",
    table: "posts",
    primary_key: "id",
    key_type: KeyType::BigInt,
    columns: &[
        ColumnDef::new("id", "bigint"),
        ColumnDef::new("author_id", "uuid"),
        ColumnDef::new("title", "text"),
        ColumnDef::new("price", "numeric"),
        ColumnDef::new("created_at", "timestamptz"),
        ColumnDef::new("updated_at", "timestamptz"),
        ColumnDef::new("deleted_at", "timestamptz"),
    ],
    fillable: &["author_id", "title", "price"],
    hidden: &[],
    soft_deletes: true,
    timestamps: true,
    relations: &[
        RelationDef {
            name: "author",
            related: &USERS,
            kind: RelationKind::BelongsTo {
                foreign_key: "author_id",
                owner_key: "id",
            },
        },
        RelationDef {
            name: "comments",
            related: &COMMENTS,
            kind: RelationKind::HasMany {
                foreign_key: "post_id",
                local_key: "id",
            },
        },
        RelationDef {
            name: "tags",
            related: &TAGS,
            kind: RelationKind::BelongsToMany {
                pivot_table: "post_tag",
                foreign_pivot_key: "post_id",
                related_pivot_key: "tag_id",
                pivot_columns: &[ColumnDef::new("position", "integer")],
            },
        },
    ],
    translations: Some(TranslationsDef {
        table: "post_translations",
        foreign_key: "post_id",
        lang_column: "lang_id",
        columns: &[TranslatedColumn {
            input: "title",
            main_column: Some("title"),
            translated_column: "title_translated",
        }],
    }),
};

pub static COMMENTS: ModelDef = ModelDef {
    schema: "blog",
    table: "comments",
    primary_key: "id",
    key_type: KeyType::BigInt,
    columns: &[
        ColumnDef::new("id", "bigint"),
        ColumnDef::new("post_id", "bigint"),
        ColumnDef::new("body", "text"),
    ],
    fillable: &["post_id", "body"],
    hidden: &[],
    soft_deletes: false,
    timestamps: false,
    relations: &[],
    translations: None,
};

pub static TAGS: ModelDef = ModelDef {
    schema: "blog",
    table: "tags",
    primary_key: "id",
    key_type: KeyType::BigInt,
    columns: &[ColumnDef::new("id", "bigint"), ColumnDef::new("label", "text")],
    fillable: &["label"],
    hidden: &[],
    soft_deletes: false,
    timestamps: false,
    relations: &[],
    translations: None,
};
