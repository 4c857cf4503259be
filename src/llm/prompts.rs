//! Prompt templates for every model-backed step

use super::prompt::{PromptMessage, PromptTemplate};

pub const PARSE_QUESTION: PromptTemplate = PromptTemplate {
    name: "parse_question",
    messages: &[
        PromptMessage::system(
            r#"You are a data analyst who reads database schemas and user questions.
Given the schema and the question, find the tables and columns needed to answer it.
If the question has nothing to do with the database, or the schema lacks the information to answer it, set is_relevant to false.

Reply with JSON only, in this shape:
{{
    "is_relevant": boolean,
    "relevant_tables": [
        {{
            "table_name": string,
            "columns": [string],
            "noun_columns": [string]
        }}
    ]
}}

"noun_columns" lists only relevant columns whose values are names or categories. For "Who are the top selling artists?" a column "Artist name" belongs there, "Artist ID" does not. Never list columns holding numbers."#,
        ),
        PromptMessage::user(
            "===Database schema:\n{schema}\n\n===User question:\n{question}\n\nIdentify relevant tables and columns:",
        ),
    ],
};

pub const GENERATE_SQL: PromptTemplate = PromptTemplate {
    name: "generate_sql",
    messages: &[
        PromptMessage::system(
            r#"You write SQL queries that answer user questions, given the database schema, the relevant tables and columns, and the distinct noun values found in them.

If the information is not sufficient to write a query, reply with exactly NOT_ENOUGH_INFO.

Examples:

1. What is the top selling product?
SELECT `product_name`, SUM(`quantity`) AS total_quantity FROM `sales` WHERE `product_name` IS NOT NULL AND `quantity` IS NOT NULL AND `product_name` != "" AND `quantity` != "" AND `product_name` != "N/A" AND `quantity` != "N/A" GROUP BY `product_name` ORDER BY total_quantity DESC LIMIT 1

2. What is the market share of each product?
SELECT `product name`, SUM(`quantity`) * 100.0 / (SELECT SUM(`quantity`) FROM `sales`) AS market_share FROM `sales` WHERE `product name` IS NOT NULL AND `quantity` IS NOT NULL AND `product name` != "" AND `quantity` != "" AND `product name` != "N/A" AND `quantity` != "N/A" GROUP BY `product name` ORDER BY market_share DESC

3. Plot the distribution of income
SELECT `income`, COUNT(*) AS count FROM `users` WHERE `income` IS NOT NULL AND `income` != "" AND `income` != "N/A" GROUP BY `income`

The query must return exactly two or three columns, shaped as
[[x, y]]
or
[[label, x, y]]

For a request like "plot the distribution of fares for men and women", count how often each fare occurs: x is the fare, y is the number of people who paid it, label is the sex.
Skip every row where any selected column is NULL, "N/A" or "".
Reply with the query string only, without formatting. Spell nouns exactly as in the unique nouns list. Enclose every table and column name in backticks."#,
        ),
        PromptMessage::user(
            "===Database schema:\n{schema}\n\n===User question:\n{question}\n\n===Relevant tables and columns:\n{parsed_question}\n\n===Unique nouns in relevant tables:\n{unique_nouns}\n\nGenerate SQL query string",
        ),
    ],
};

pub const VALIDATE_SQL: PromptTemplate = PromptTemplate {
    name: "validate_sql",
    messages: &[
        PromptMessage::system(
            r#"You validate and repair SQL queries:
1. Check that the query is valid SQL.
2. Check that every table and column exists in the schema and is spelled correctly. Table and column names must be enclosed in backticks.
3. If anything is wrong, fix it and return the corrected query.
4. If nothing is wrong, say so.

Reply with JSON only:
{{
    "valid": boolean,
    "issues": string or null,
    "corrected_query": string
}}"#,
        ),
        PromptMessage::user(
            r#"===Database schema:
{schema}

===Generated SQL query:
{sql_query}

Reply with JSON only, for example:
1. {{
    "valid": true,
    "issues": null,
    "corrected_query": "None"
}}

2. {{
    "valid": false,
    "issues": "Column USERS does not exist",
    "corrected_query": "SELECT * FROM `users` WHERE `age` > 25"
}}

3. {{
    "valid": false,
    "issues": "Names containing spaces must be enclosed in backticks",
    "corrected_query": "SELECT * FROM `gross income` WHERE `age` > 25"
}}"#,
        ),
    ],
};

pub const FORMAT_RESULTS: PromptTemplate = PromptTemplate {
    name: "format_results",
    messages: &[
        PromptMessage::system(
            "You turn database query results into a short human-readable answer. Conclude the user's question from the results. Do not use markdown. Answer in a single line.",
        ),
        PromptMessage::user("User question: {question}\n\nQuery results: {results}\n\nFormatted response:"),
    ],
};

pub const CHOOSE_VISUALIZATION: PromptTemplate = PromptTemplate {
    name: "choose_visualization",
    messages: &[
        PromptMessage::system(
            r#"You recommend a chart for a query result. Given the user's question, the SQL query and its results, pick the most suitable chart type, or none if no chart fits.

Chart types:
- bar: compare categorical data, or discrete changes over time, with more than two categories. "What are the sales figures for each product?", "What percentage of each city is male?"
- horizontal_bar: compare categorical data when there are few categories or the values differ a lot. "Show the revenue of A and B", "How many men and women got promoted?"
- scatter: relationships or distributions where both axes are continuous. "Plot the distribution of fares", "Is advertising spend related to sales?" Do not use it without a continuous x axis.
- pie: parts of a whole, proportions or percentages. "What is the market share of each company?"
- line: trends over time where the x axis is continuous or time based. "How have website visits changed over the year?" Do not use it otherwise.

Typical cases:
1. Aggregations over time ("average revenue by month") - line
2. Comparisons ("sales of product A versus product B") - bar or line
3. Distributions ("distribution of user ages") - scatter
4. Trends ("active users over the past year") - line
5. Proportions ("market share of products") - pie
6. Correlations ("marketing spend versus revenue") - scatter

Reply in exactly this format:
Recommended Visualization: [one of: bar, horizontal_bar, line, pie, scatter, none]
Reason: [one sentence]"#,
        ),
        PromptMessage::user(
            "User question: {question}\nSQL query: {sql_query}\nQuery results: {results}\n\nRecommend a visualization:",
        ),
    ],
};

pub const SERIES_LABEL: PromptTemplate = PromptTemplate {
    name: "series_label",
    messages: &[
        PromptMessage::system(
            "You label chart data. Given a question and a sample of its data, give a short, relevant label for the data series.",
        ),
        PromptMessage::user(
            "Question: {question}\nData (first few rows): {data}\n\nGive a short label for the y axis only. Sales figures per product would be 'Sales', city populations would be 'Population', revenue by region would be 'Revenue'.",
        ),
    ],
};

pub const Y_AXIS_LABEL: PromptTemplate = PromptTemplate {
    name: "y_axis_label",
    messages: &[
        PromptMessage::system(
            "You label chart data. Given a question and a sample of its data, give a short, relevant label for the y axis.",
        ),
        PromptMessage::user(
            "Question: {question}\nData (first few rows): {data}\n\nGive a short label for the y axis only. Sales over time for several categories would be 'Sales', population growth for several groups would be 'Population'.",
        ),
    ],
};

pub const FORMAT_CHART_DATA: PromptTemplate = PromptTemplate {
    name: "format_chart_data",
    messages: &[
        PromptMessage::system(
            "You reshape query results into the data structure a chart expects. You receive the user's question, the SQL query, its result and an example of the required structure.",
        ),
        PromptMessage::user(
            "Question: {question}\n\nSQL query: {sql_query}\nResult: {results}\n\nStructure the data like this example: {instructions}\nReply with the JSON only, without formatting.",
        ),
    ],
};
