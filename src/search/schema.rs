//! Index schema for archived emails.

use tantivy::schema::{
    FAST, Field, INDEXED, IndexRecordOption, STORED, STRING, Schema, TextFieldIndexing,
    TextOptions,
};

/// Build the index schema.
///
/// `list_name` and `message_id` are stored so hits can be resolved back to
/// store rows; `subject` and `content` are stemmed; `private_list` backs
/// the public-only filter for cross-list searches.
pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();

    builder.add_text_field("list_name", STRING | STORED);
    builder.add_text_field("message_id", STRING | STORED);

    let text = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_index_option(IndexRecordOption::WithFreqsAndPositions)
            .set_tokenizer("default"),
    );
    let stemmed = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_index_option(IndexRecordOption::WithFreqsAndPositions)
            .set_tokenizer("en_stem"),
    );

    builder.add_text_field("sender", text.clone());
    builder.add_text_field("user_id", STRING);
    builder.add_text_field("subject", stemmed.clone());
    builder.add_text_field("content", stemmed);
    builder.add_i64_field("date", FAST | STORED);
    builder.add_text_field("attachments", text);
    builder.add_text_field("tags", STRING);
    builder.add_u64_field("private_list", INDEXED | FAST);

    builder.build()
}

/// Field handles resolved once at open time.
pub struct SchemaFields {
    pub list_name: Field,
    pub message_id: Field,
    pub sender: Field,
    pub user_id: Field,
    pub subject: Field,
    pub content: Field,
    pub date: Field,
    pub attachments: Field,
    pub tags: Field,
    pub private_list: Field,
}

impl SchemaFields {
    pub fn new(schema: &Schema) -> Self {
        let field = |name: &str| schema.get_field(name).expect("schema field exists");
        SchemaFields {
            list_name: field("list_name"),
            message_id: field("message_id"),
            sender: field("sender"),
            user_id: field("user_id"),
            subject: field("subject"),
            content: field("content"),
            date: field("date"),
            attachments: field("attachments"),
            tags: field("tags"),
            private_list: field("private_list"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_has_all_fields() {
        let schema = build_schema();
        for name in [
            "list_name",
            "message_id",
            "sender",
            "user_id",
            "subject",
            "content",
            "date",
            "attachments",
            "tags",
            "private_list",
        ] {
            assert!(schema.get_field(name).is_ok(), "missing field {}", name);
        }
    }
}
